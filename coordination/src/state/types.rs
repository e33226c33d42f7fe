//! Core types for a single analysis run.
//!
//! A run is keyed by a subject (ticker, company, asset) and an analysis date.
//! Everything here is immutable once the run starts; the mutable side lives
//! in [`super::store::SharedState`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::debate::DebateKind;
use crate::signal::TradeSignal;

/// Data-gathering analyst types. Each one owns exactly one report field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystKind {
    /// Price action and technical indicators.
    Market,
    /// Social media sentiment.
    Social,
    /// News and macro headlines.
    News,
    /// Financial statements and insider activity.
    Fundamentals,
}

impl AnalystKind {
    /// All analyst kinds in their default declaration order.
    pub const ALL: [AnalystKind; 4] = [
        AnalystKind::Market,
        AnalystKind::Social,
        AnalystKind::News,
        AnalystKind::Fundamentals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Social => "social",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
        }
    }
}

impl fmt::Display for AnalystKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalystKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(Self::Market),
            "social" => Ok(Self::Social),
            "news" => Ok(Self::News),
            "fundamentals" => Ok(Self::Fundamentals),
            other => Err(format!("unknown analyst kind: {other}")),
        }
    }
}

/// Whether analyst data is fetched live or served from a local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    Live,
    #[default]
    Cached,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Cached => write!(f, "cached"),
        }
    }
}

/// Per-run knobs. Copied into the [`RunContext`] and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Enabled analysts, in the order they are scheduled when run sequentially.
    pub analysts: Vec<AnalystKind>,
    /// Research (bull/bear) debate turns before the research manager converges.
    pub max_debate_rounds: u32,
    /// Risk debate turns before the risk manager converges.
    pub max_risk_rounds: u32,
    pub data_mode: DataMode,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            analysts: AnalystKind::ALL.to_vec(),
            max_debate_rounds: 1,
            max_risk_rounds: 1,
            data_mode: DataMode::Cached,
        }
    }
}

impl RunSettings {
    /// Reject settings no run can satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.analysts.is_empty() {
            return Err("at least one analyst must be enabled".into());
        }
        for (i, kind) in self.analysts.iter().enumerate() {
            if self.analysts[..i].contains(kind) {
                return Err(format!("analyst {kind} listed more than once"));
            }
        }
        Ok(())
    }

    /// Turn budget for the given debate.
    pub fn round_limit(&self, kind: DebateKind) -> u32 {
        match kind {
            DebateKind::Research => self.max_debate_rounds,
            DebateKind::Risk => self.max_risk_rounds,
        }
    }
}

/// Immutable inputs of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    run_id: Uuid,
    subject: String,
    analysis_date: NaiveDate,
    settings: RunSettings,
}

impl RunContext {
    pub fn new(subject: impl Into<String>, analysis_date: NaiveDate, settings: RunSettings) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            subject: subject.into(),
            analysis_date,
            settings,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn analysis_date(&self) -> NaiveDate {
        self.analysis_date
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Whether the analyst takes part in this run.
    pub fn is_enabled(&self, kind: AnalystKind) -> bool {
        self.settings.analysts.contains(&kind)
    }
}

/// Named slot in the shared state.
///
/// Every variant except [`StateField::Transcript`] is write-once. Transcripts
/// are append-only ledgers owned by the debate roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StateField {
    AnalystReport(AnalystKind),
    Transcript(DebateKind),
    /// Research manager's consolidated plan.
    InvestmentPlan,
    TraderPlan,
    /// Risk manager's final decision text.
    FinalDecision,
    /// Signal extracted from the final decision.
    FinalSignal,
}

impl StateField {
    pub fn is_write_once(self) -> bool {
        !matches!(self, Self::Transcript(_))
    }

    /// Whether the run requires this field at all. Reports of disabled
    /// analysts are never written and never required.
    pub fn is_required(self, context: &RunContext) -> bool {
        match self {
            Self::AnalystReport(kind) => context.is_enabled(kind),
            _ => true,
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnalystReport(kind) => write!(f, "{kind}_report"),
            Self::Transcript(kind) => write!(f, "{kind}_transcript"),
            Self::InvestmentPlan => write!(f, "investment_plan"),
            Self::TraderPlan => write!(f, "trader_plan"),
            Self::FinalDecision => write!(f, "final_decision"),
            Self::FinalSignal => write!(f, "final_signal"),
        }
    }
}

impl From<StateField> for String {
    fn from(field: StateField) -> Self {
        field.to_string()
    }
}

impl TryFrom<String> for StateField {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "investment_plan" => return Ok(Self::InvestmentPlan),
            "trader_plan" => return Ok(Self::TraderPlan),
            "final_decision" => return Ok(Self::FinalDecision),
            "final_signal" => return Ok(Self::FinalSignal),
            "research_transcript" => return Ok(Self::Transcript(DebateKind::Research)),
            "risk_transcript" => return Ok(Self::Transcript(DebateKind::Risk)),
            _ => {}
        }
        value
            .strip_suffix("_report")
            .ok_or_else(|| format!("unknown state field: {value}"))
            .and_then(AnalystKind::from_str)
            .map(Self::AnalystReport)
    }
}

/// Value held by a write-once field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Signal(TradeSignal),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Signal(_) => None,
        }
    }

    pub fn as_signal(&self) -> Option<TradeSignal> {
        match self {
            Self::Signal(signal) => Some(*signal),
            Self::Text(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Signal(signal) => write!(f, "{signal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_round_trip_through_strings() {
        let fields = [
            StateField::AnalystReport(AnalystKind::Fundamentals),
            StateField::Transcript(DebateKind::Risk),
            StateField::FinalSignal,
        ];
        for field in fields {
            let name = field.to_string();
            assert_eq!(StateField::try_from(name).unwrap(), field);
        }
        assert!(StateField::try_from("weather_report".to_string()).is_err());
    }

    #[test]
    fn disabled_analyst_report_is_not_required() {
        let settings = RunSettings {
            analysts: vec![AnalystKind::Market],
            ..RunSettings::default()
        };
        let ctx = RunContext::new("NVDA", NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), settings);
        assert!(StateField::AnalystReport(AnalystKind::Market).is_required(&ctx));
        assert!(!StateField::AnalystReport(AnalystKind::News).is_required(&ctx));
        assert!(StateField::InvestmentPlan.is_required(&ctx));
    }

    #[test]
    fn analyst_kind_parses_case_insensitively() {
        assert_eq!(" News ".parse::<AnalystKind>().unwrap(), AnalystKind::News);
        assert!("weather".parse::<AnalystKind>().is_err());
    }

    #[test]
    fn settings_reject_empty_and_duplicate_analysts() {
        assert!(RunSettings::default().validate().is_ok());
        let empty = RunSettings {
            analysts: vec![],
            ..RunSettings::default()
        };
        assert!(empty.validate().is_err());
        let dup = RunSettings {
            analysts: vec![AnalystKind::News, AnalystKind::News],
            ..RunSettings::default()
        };
        assert_eq!(dup.validate().unwrap_err(), "analyst news listed more than once");
    }

    #[test]
    fn transcripts_are_not_write_once() {
        assert!(!StateField::Transcript(DebateKind::Research).is_write_once());
        assert!(StateField::TraderPlan.is_write_once());
    }
}
