//! Walks the standard graph with the router and a write-once state, the way
//! the orchestrator does, but without any capability calls.

use std::sync::Arc;

use chrono::NaiveDate;
use desk_coordination::{
    AnalystKind, ConditionalRouter, DebateKind, DebateRole, FieldValue, NextStage, RunContext, RunSettings,
    SharedState, StageGraph, StageId, StateError, StateField, TradeSignal, Transition,
};

fn context(analysts: Vec<AnalystKind>, debate: u32, risk: u32) -> Arc<RunContext> {
    let settings = RunSettings {
        analysts,
        max_debate_rounds: debate,
        max_risk_rounds: risk,
        ..RunSettings::default()
    };
    Arc::new(RunContext::new(
        "AMZN",
        NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
        settings,
    ))
}

/// Commit a canned output for `stage`, mirroring what a capability would produce.
fn commit(state: &mut SharedState, graph: &StageGraph, stage: StageId) {
    if let StageId::Debater(role) = stage {
        state.append_turn(role, format!("{role} argues")).unwrap();
        return;
    }
    for field in &graph.descriptor(stage).unwrap().writes {
        let value = match field {
            StateField::FinalSignal => FieldValue::Signal(TradeSignal::Hold),
            _ => FieldValue::Text(format!("{stage} output")),
        };
        state.set(*field, value).unwrap();
    }
}

/// Run to `Terminal`, returning the visited stages.
fn walk(context: Arc<RunContext>) -> (Vec<StageId>, SharedState) {
    let graph = StageGraph::standard().unwrap();
    let router = ConditionalRouter::new();
    let mut state = SharedState::new(context);
    let mut visited = Vec::new();

    let mut next = router.entry(state.view()).unwrap();
    while let Some(stage) = next.stage() {
        commit(&mut state, &graph, stage);
        visited.push(stage);
        next = match graph.transition(stage).unwrap() {
            Transition::Fixed(to) => NextStage::Fixed(to),
            Transition::Terminal => NextStage::Terminal,
            Transition::Dynamic => router.resolve(stage, state.view()).unwrap(),
        };
        assert!(visited.len() < 100, "walk did not terminate");
    }
    (visited, state)
}

#[test]
fn full_roster_walk_matches_round_limits() {
    let (visited, state) = walk(context(AnalystKind::ALL.to_vec(), 2, 3));

    let expected: Vec<StageId> = AnalystKind::ALL
        .map(StageId::Analyst)
        .into_iter()
        .chain([
            StageId::Debater(DebateRole::Bull),
            StageId::Debater(DebateRole::Bear),
            StageId::ResearchManager,
            StageId::Trader,
            StageId::Debater(DebateRole::Aggressive),
            StageId::Debater(DebateRole::Conservative),
            StageId::Debater(DebateRole::Neutral),
            StageId::RiskManager,
        ])
        .collect();
    assert_eq!(visited, expected);
    assert!(state.view().is_complete());
    assert_eq!(state.view().final_signal(), Some(TradeSignal::Hold));
}

#[test]
fn odd_research_budget_ends_on_the_bull() {
    let (_, state) = walk(context(vec![AnalystKind::Social], 3, 1));
    let research = state.ledger(DebateKind::Research);
    assert_eq!(
        research.roles(),
        vec![DebateRole::Bull, DebateRole::Bear, DebateRole::Bull]
    );
    assert_eq!(research.history(DebateRole::Bull), vec!["bull argues", "bull argues"]);
}

#[test]
fn zero_round_debates_skip_straight_to_the_managers() {
    let (visited, state) = walk(context(vec![AnalystKind::Market], 0, 0));
    assert_eq!(
        visited,
        vec![
            StageId::Analyst(AnalystKind::Market),
            StageId::ResearchManager,
            StageId::Trader,
            StageId::RiskManager,
        ]
    );
    assert!(state.ledger(DebateKind::Research).is_empty());
    assert!(state.ledger(DebateKind::Risk).is_empty());
}

#[test]
fn second_write_to_a_committed_field_is_rejected() {
    let (_, mut state) = walk(context(vec![AnalystKind::News], 1, 1));
    let err = state
        .set(StateField::TraderPlan, FieldValue::Text("again".into()))
        .unwrap_err();
    assert_eq!(err, StateError::DuplicateWrite(StateField::TraderPlan));
    assert_eq!(
        state.view().text(StateField::TraderPlan).unwrap(),
        "trader output"
    );
}

#[test]
fn snapshots_serialize_with_named_fields() {
    let (_, state) = walk(context(vec![AnalystKind::Fundamentals], 1, 1));
    let json = serde_json::to_value(state.view()).unwrap();
    assert_eq!(json["fields"]["fundamentals_report"]["kind"], "text");
    assert_eq!(json["fields"]["final_signal"]["value"], "HOLD");
}
