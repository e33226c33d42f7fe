//! Trade signal extraction from free-form decision text.
//!
//! Decision stages are asked to end with a line such as
//! `FINAL TRANSACTION PROPOSAL: **BUY**`. When that marker is missing the
//! last standalone upper-case `BUY`/`SELL`/`HOLD` in the text wins.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PROPOSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)final\s+(?:transaction\s+)?proposal\s*:\s*\**\s*(buy|sell|hold)\b")
        .expect("PROPOSAL_RE regex should compile")
});

static KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(BUY|SELL|HOLD)\b").expect("KEYWORD_RE regex should compile"));

/// Core action of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSignal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for TradeSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "HOLD" => Ok(Self::Hold),
            other => Err(format!("not a trade signal: {other}")),
        }
    }
}

/// Pull the trade signal out of a decision text, if there is one.
pub fn extract_signal(text: &str) -> Option<TradeSignal> {
    if let Some(caps) = PROPOSAL_RE.captures_iter(text).last() {
        return caps.get(1).and_then(|m| m.as_str().parse().ok());
    }
    KEYWORD_RE
        .find_iter(text)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}
