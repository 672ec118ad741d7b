//! Property and behavior tests for agent selection

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use baton::agents::{Agent, AgentId, AgentPerformance, AgentType, InMemoryAgentDirectory};
use baton::config::SelectionConfig;
use baton::events::EventBus;
use baton::load::SystemSnapshot;
use baton::selection::*;
use common::*;

fn selector_for(agents: Vec<Agent>) -> SmartAgentSelection {
    SmartAgentSelection::new(
        Arc::new(InMemoryAgentDirectory::with_agents(agents)),
        Arc::new(EventBus::default()),
        SelectionConfig::default(),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn performance_strategy() -> impl Strategy<Value = AgentPerformance> {
    (0.0..=1.0f64, 1.0..10_000.0f64, 0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64).prop_map(
        |(success_rate, response, load, error_rate, satisfaction)| AgentPerformance {
            success_rate,
            average_response_time_ms: response,
            current_load: load,
            error_rate,
            user_satisfaction: satisfaction,
            ..Default::default()
        },
    )
}

fn context_for(agent: &Agent) -> SelectionContext {
    SelectionContext {
        agent_performance: HashMap::from([(agent.id.clone(), agent.performance.clone())]),
        agent_history: HashMap::new(),
        session_history: None,
        system: SystemSnapshot::empty(),
        similar_switches: Vec::new(),
        built_at: Utc::now(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_recommendation_is_bounded(perfs in prop::collection::vec(performance_strategy(), 1..8)) {
        let agents: Vec<Agent> = perfs
            .into_iter()
            .enumerate()
            .map(|(i, perf)| create_test_agent(&format!("agent-{}", i), &["rust"]).with_performance(perf))
            .collect();
        let count = agents.len();
        let selector = selector_for(agents);
        let request = switch_request("req-prop", "current", "session", &["rust"]);

        let recommendation = runtime().block_on(selector.select_best_agent(&request)).unwrap();
        let chosen = &recommendation.recommended_agent;

        prop_assert!((0.0..=1.0).contains(&chosen.score));
        prop_assert!((0.0..=1.0).contains(&chosen.confidence_level));
        prop_assert!(recommendation.alternative_options.len() <= 3);
        prop_assert_eq!(recommendation.alternative_options.len(), (count - 1).min(3));
        prop_assert!(recommendation
            .alternative_options
            .iter()
            .all(|alt| alt.agent_id != chosen.agent_id && alt.score <= chosen.score));

        let (low, high) = recommendation.estimated_impact.confidence_interval;
        prop_assert!(0.0 <= low && low <= high && high <= 1.0);
    }

    #[test]
    fn prop_failing_algorithm_is_excluded(perf in performance_strategy()) {
        let config = SelectionConfig::default();
        let agent = create_test_agent("agent-1", &["rust"]).with_performance(perf);
        let request = switch_request("req-prop", "current", "session", &["rust"]);
        let context = context_for(&agent);

        let healthy = AlgorithmRegistry::with_defaults(&config);
        let with_failure = AlgorithmRegistry::with_defaults(&config);
        with_failure.register("broken", 50.0, evaluator_fn(|_, _, _| anyhow::bail!("model offline")));

        let expected = healthy.score(&agent, &request.query(), &context);
        let actual = with_failure.score(&agent, &request.query(), &context);

        prop_assert_eq!(actual.failed.clone(), vec!["broken".to_string()]);
        let (expected, actual) = (expected.score.unwrap(), actual.score.unwrap());
        prop_assert!((expected - actual).abs() < 1e-12);
    }

    #[test]
    fn prop_weights_stay_in_band(outcomes in prop::collection::vec(any::<bool>(), 0..300)) {
        let selector = selector_for(vec![create_test_agent("agent-1", &["rust"])]);
        let agent = AgentId::from("agent-1");

        for (i, success) in outcomes.into_iter().enumerate() {
            selector.learn_from_switch_outcome(
                &format!("req-{}", i),
                &agent,
                &SwitchOutcome { success, switch_duration_ms: 1000, user_satisfaction: None },
            );
        }

        for (_, weight) in selector.algorithm_weights() {
            prop_assert!((1.0..=100.0).contains(&weight));
        }
    }
}

#[test]
fn test_failing_algorithm_matches_manual_average() {
    let config = SelectionConfig::default();
    let agent = create_test_agent("agent-1", &["rust"]);
    let request = switch_request("req-1", "current", "session", &["rust"]);
    let context = context_for(&agent);

    let registry = AlgorithmRegistry::new(config.min_weight, config.max_weight);
    registry.register("a", 30.0, evaluator_fn(|_, _, _| Ok(0.2)));
    registry.register("b", 10.0, evaluator_fn(|_, _, _| Ok(1.0)));
    registry.register("broken", 60.0, evaluator_fn(|_, _, _| anyhow::bail!("timeout")));

    let ensemble = registry.score(&agent, &request.query(), &context);
    // (0.2 * 30 + 1.0 * 10) / 40
    assert!((ensemble.score.unwrap() - 0.4).abs() < 1e-12);
    assert_eq!(ensemble.evaluated.len(), 2);
}

#[test]
fn test_learning_converges_to_ceiling_and_floor() {
    let selector = selector_for(vec![create_test_agent("agent-1", &["rust"])]);
    let agent = AgentId::from("agent-1");
    let success = SwitchOutcome {
        success: true,
        switch_duration_ms: 800,
        user_satisfaction: Some(0.9),
    };
    let failure = SwitchOutcome {
        success: false,
        switch_duration_ms: 800,
        user_satisfaction: None,
    };

    let mut previous: HashMap<String, f64> = selector.algorithm_weights().into_iter().collect();
    for i in 0..500 {
        selector.learn_from_switch_outcome(&format!("up-{}", i), &agent, &success);
        for (name, weight) in selector.algorithm_weights() {
            assert!(weight <= 100.0);
            assert!(weight >= previous[&name]);
            previous.insert(name, weight);
        }
    }
    assert!(selector.algorithm_weights().iter().all(|(_, w)| *w == 100.0));

    for i in 0..500 {
        selector.learn_from_switch_outcome(&format!("down-{}", i), &agent, &failure);
        for (name, weight) in selector.algorithm_weights() {
            assert!(weight >= 1.0);
            assert!(weight <= previous[&name]);
            previous.insert(name, weight);
        }
    }
    assert!(selector.algorithm_weights().iter().all(|(_, w)| *w == 1.0));

    let history = selector.agent_history(&agent).unwrap();
    assert_eq!(history.total_switches, 1000);
    assert_eq!(history.successful_switches, 500);
}

#[tokio::test]
async fn test_criteria_filters() {
    let agents = vec![
        create_loaded_agent("busy", &["rust"], 0.85, 0.99),
        create_loaded_agent("flaky", &["rust"], 0.1, 0.4),
        create_loaded_agent("reviewer", &["rust", "review"], 0.1, 0.95),
        create_loaded_agent("steady", &["rust"], 0.2, 0.9),
    ];
    let selector = selector_for(agents);

    let mut request = switch_request("req-1", "current", "session", &["rust"]);
    request.criteria.min_success_rate = Some(0.8);
    request.criteria.workload_preference = WorkloadPreference::Low;
    request.criteria.excluded_agents = vec![AgentId::from("reviewer")];

    let recommendation = selector.select_best_agent(&request).await.unwrap();
    assert_eq!(recommendation.recommended_agent.agent_id.as_str(), "steady");
    assert!(recommendation.alternative_options.is_empty());

    let mut typed = switch_request("req-2", "current", "session", &["review"]);
    typed.criteria.preferred_agent_types = vec![AgentType::Reviewer];
    let err = selector.select_best_agent(&typed).await.unwrap_err();
    assert!(matches!(err, SelectionError::NoCandidates { .. }));
}

#[tokio::test]
async fn test_recommendation_describes_tradeoffs() {
    let agents = vec![
        create_loaded_agent("current", &["rust"], 0.7, 0.6).with_status(baton::agents::AgentStatus::Active),
        create_loaded_agent("candidate", &["rust"], 0.9, 0.98),
    ];
    let selector = selector_for(agents);

    let request = switch_request("req-1", "current", "session", &["rust"]);
    let recommendation = selector.select_best_agent(&request).await.unwrap();

    assert_eq!(recommendation.recommended_agent.agent_id.as_str(), "candidate");
    assert!(recommendation
        .expected_benefits
        .iter()
        .any(|b| b.starts_with("Higher success rate")));
    assert!(recommendation
        .potential_risks
        .iter()
        .any(|r| r.severity == RiskSeverity::Medium && r.description.contains("heavily loaded")));
    assert!(recommendation.estimated_impact.performance_delta > 0.0);
    assert!(recommendation
        .recommended_agent
        .specializations
        .contains(&"high_reliability".to_string()));

    let stats = selector.selection_statistics();
    assert_eq!(stats.total_selections, 1);
    assert_eq!(selector.selection_history()[0].request_id, "req-1");
}

#[tokio::test]
async fn test_session_preference_steers_selection() {
    let selector = selector_for(vec![
        create_test_agent("alpha", &["rust"]),
        create_test_agent("beta", &["rust"]),
    ]);

    // alpha wins the tie first; a poor outcome should push the session to beta
    let first = switch_request("req-1", "current", "session-1", &["rust"]);
    let chosen = selector.select_best_agent(&first).await.unwrap();
    assert_eq!(chosen.recommended_agent.agent_id.as_str(), "alpha");
    selector.learn_from_switch_outcome(
        "req-1",
        &AgentId::from("alpha"),
        &SwitchOutcome {
            success: false,
            switch_duration_ms: 4000,
            user_satisfaction: Some(0.1),
        },
    );

    let second = switch_request("req-2", "current", "session-1", &["rust"]);
    let chosen = selector.select_best_agent(&second).await.unwrap();
    assert_eq!(chosen.recommended_agent.agent_id.as_str(), "beta");
}

#[tokio::test]
async fn test_custom_algorithm_can_dominate() {
    let selector = selector_for(vec![
        create_test_agent("alpha", &["rust"]),
        create_test_agent("omega", &["rust"]),
    ]);
    selector.register_algorithm(
        "prefers_omega",
        100.0,
        evaluator_fn(|agent, _, _| Ok(if agent.id.as_str() == "omega" { 1.0 } else { 0.0 })),
    );

    let request = switch_request("req-1", "current", "session", &["rust"]);
    let recommendation = selector.select_best_agent(&request).await.unwrap();
    assert_eq!(recommendation.recommended_agent.agent_id.as_str(), "omega");

    assert!(selector.remove_algorithm("prefers_omega"));
    assert!(!selector.remove_algorithm("prefers_omega"));
}
