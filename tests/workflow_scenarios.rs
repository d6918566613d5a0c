mod common;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use common::{revise, Harness, ScriptedGenerator, ScriptedSearch};
use essay_workflow::orchestrator::{RunControl, RunSnapshot};
use essay_workflow::workflow::{EntryKind, StageSettings};
use essay_workflow::{
    CapabilityError, CompletionReason, Orchestrator, StageName, Status, WorkflowRequest,
    WorkflowState,
};

const PLAN: &str = r#"{"sections": [
    {"title": "Introduction", "summary": "Why tidal power matters"},
    {"title": "Economics", "summary": "Costs per MWh"},
    {"title": "Outlook", "summary": "Deployment to 2040"}
]}"#;

fn never_satisfied() -> ScriptedGenerator {
    ScriptedGenerator::new()
        .reply(StageName::Planner, PLAN)
        .reply(StageName::Researcher, r#"{"queries": ["tidal lagoon costs", "tidal stream output"]}"#)
        .reply(StageName::Researcher, r#"{"queries": ["Tidal Lagoon Costs", "tidal turbine maintenance"]}"#)
        .reply(StageName::Researcher, r#"{"queries": ["tidal power subsidies"]}"#)
        .reply(StageName::Drafter, "Draft one about tidal power.")
        .reply(StageName::Drafter, "Draft two about tidal power, with costs.")
        .reply(StageName::Drafter, "Draft three about tidal power, with costs and subsidies.")
        .reply(StageName::Reflector, &revise("Needs evidence on costs."))
        .reply(StageName::Critic, "Add levelised cost figures for each project.")
}

#[tokio::test]
async fn test_budget_exhausted_after_max_revisions() {
    let h = Harness::new(never_satisfied(), ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(result.reason, CompletionReason::BudgetExhausted);
    assert!(result.has_document());

    let state = &result.state;
    assert_eq!(state.status(), Status::Complete);
    assert_eq!(state.revision_count(), 2);
    assert_eq!(state.draft(), "Draft three about tidal power, with costs and subsidies.");
    assert!(state.critique().unwrap().contains("Needs evidence on costs."));

    assert_eq!(h.generator.calls(StageName::Planner), 1);
    assert_eq!(h.generator.calls(StageName::Drafter), 3);
    assert_eq!(h.generator.calls(StageName::Reflector), 3);
    assert_eq!(h.generator.calls(StageName::Critic), 2);
    assert_eq!(result.invocations(StageName::Drafter), 3);
    assert_eq!(result.invocations(StageName::Critic), 2);

    // 1 planner + 3 × (researcher, drafter, reflector) + 2 critic
    assert_eq!(state.history().len(), 12);
    let ordinals: Vec<u64> = state.history().iter().map(|e| e.ordinal).collect();
    assert_eq!(ordinals, (1..=12).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_revision_cycles_never_reissue_queries() {
    let h = Harness::new(never_satisfied(), ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(
        h.search.answered_queries(),
        vec![
            "tidal lagoon costs",
            "tidal stream output",
            "tidal turbine maintenance",
            "tidal power subsidies",
        ]
    );
    assert_eq!(result.state.queries().len(), 4);
    // 每个检索词两条不同来源
    assert_eq!(result.state.research_notes().len(), 8);
}

#[tokio::test]
async fn test_feedback_flows_through_critic_to_research_and_drafting() {
    let h = Harness::new(never_satisfied(), ScriptedSearch::new());
    h.orchestrator()
        .run(WorkflowRequest::new("Tidal power", 1))
        .await;

    let critic_inputs = h.generator.contexts(StageName::Critic);
    assert_eq!(critic_inputs.len(), 1);
    assert_eq!(critic_inputs[0]["critique"], "Needs evidence on costs.");
    assert_eq!(critic_inputs[0]["draft"], "Draft one about tidal power.");

    let research_inputs = h.generator.contexts(StageName::Researcher);
    assert!(research_inputs[0].get("critique").is_none());
    assert_eq!(
        research_inputs[1]["critique"],
        "Add levelised cost figures for each project."
    );
    assert_eq!(research_inputs[1]["previous_queries"].as_array().unwrap().len(), 2);

    let draft_inputs = h.generator.contexts(StageName::Drafter);
    assert!(draft_inputs[0].get("previous_draft").is_none());
    assert_eq!(draft_inputs[1]["previous_draft"], "Draft one about tidal power.");
    assert_eq!(
        draft_inputs[1]["critique"],
        "Add levelised cost figures for each project."
    );
}

#[tokio::test]
async fn test_accept_on_first_cycle() {
    let generator = ScriptedGenerator::new()
        .reply(StageName::Planner, PLAN)
        .reply(StageName::Reflector, "**Verdict:** Accept\nWell structured.");
    let h = Harness::new(generator, ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 3))
        .await;

    assert_eq!(result.reason, CompletionReason::Satisfied);
    assert_eq!(result.state.status(), Status::Complete);
    assert_eq!(result.state.revision_count(), 0);
    assert_eq!(result.state.critique(), None);
    assert_eq!(result.state.plan().len(), 3);
    assert_eq!(h.generator.calls(StageName::Drafter), 1);
    assert_eq!(h.generator.calls(StageName::Critic), 0);

    let last = result.state.latest_history_entry().unwrap();
    assert_eq!(last.stage, StageName::Reflector);
    assert_eq!(last.output_summary, "accept");
}

#[tokio::test]
async fn test_empty_plan_fails_with_validation_before_research() {
    let generator = ScriptedGenerator::new().reply(StageName::Planner, r#"{"sections": []}"#);
    let h = Harness::new(generator, ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    match &result.reason {
        CompletionReason::Failed { stage, error } => {
            assert_eq!(*stage, Some(StageName::Planner));
            assert_eq!(error.class(), "validation");
        }
        other => panic!("expected failure, got {other}"),
    }
    assert_eq!(result.reason.to_string(), "failed(validation)");
    assert_eq!(result.state.status(), Status::Failed);
    assert_eq!(h.generator.calls(StageName::Researcher), 0);
    assert_eq!(h.search.attempts(), 0);

    let last = result.state.latest_history_entry().unwrap();
    assert_eq!(last.stage, StageName::Planner);
    assert_eq!(last.kind, EntryKind::Failed);
    assert_eq!(h.sink.saved().len(), 1);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_without_calls() {
    let h = Harness::new(ScriptedGenerator::new(), ScriptedSearch::new());
    let orchestrator = h.orchestrator();

    for request in [
        WorkflowRequest::new("Tidal power", 0),
        WorkflowRequest::new("   ", 2),
    ] {
        let result = orchestrator.run(request).await;
        assert!(matches!(
            result.reason,
            CompletionReason::Failed { stage: None, .. }
        ));
        assert_eq!(result.state.status(), Status::Failed);
        assert!(result.state.history().is_empty());
    }
    assert_eq!(h.generator.calls(StageName::Planner), 0);
}

#[tokio::test]
async fn test_transient_generation_errors_are_retried() {
    let generator = ScriptedGenerator::new()
        .fail(StageName::Planner, CapabilityError::timeout("slow"))
        .fail(StageName::Planner, CapabilityError::rate_limited("busy", None))
        .reply(StageName::Planner, PLAN);
    let h = Harness::new(generator, ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(result.reason, CompletionReason::Satisfied);
    assert_eq!(h.generator.calls(StageName::Planner), 3);
    // 重试不进 history
    assert_eq!(result.invocations(StageName::Planner), 1);
}

#[tokio::test]
async fn test_transient_search_errors_are_retried() {
    let generator = ScriptedGenerator::new()
        .reply(StageName::Researcher, r#"{"queries": ["tidal power capacity"]}"#);
    let search = ScriptedSearch::new().fail_first(CapabilityError::network("reset"), 2);
    let h = Harness::new(generator, search);
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(result.reason, CompletionReason::Satisfied);
    // 失败两次，第三次成功
    assert_eq!(h.search.attempts(), 3);
    assert_eq!(h.search.answered_queries(), vec!["tidal power capacity".to_string()]);
    assert_eq!(result.state.research_notes().len(), 2);
}

#[tokio::test]
async fn test_retries_exhausted_escalates() {
    let generator = ScriptedGenerator::new()
        .fail(StageName::Planner, CapabilityError::rate_limited("busy", Some(0)));
    let h = Harness::new(generator, ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(h.generator.calls(StageName::Planner), 4);
    assert_eq!(result.reason.to_string(), "failed(transient_exhausted)");
    assert_eq!(result.state.status(), Status::Failed);
}

#[tokio::test]
async fn test_quota_error_fails_without_retry() {
    let search = ScriptedSearch::new().fail_first(CapabilityError::quota("plan limit"), 1);
    let h = Harness::new(ScriptedGenerator::new(), search);
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(h.search.attempts(), 1);
    assert!(result.reason.is_failed());
    assert_eq!(result.reason.error().map(|e| e.class()), Some("quota"));
    assert!(matches!(
        result.reason,
        CompletionReason::Failed {
            stage: Some(StageName::Researcher),
            ..
        }
    ));
    assert!(result.state.draft().is_empty());
    assert!(result.state.research_notes().is_empty());
}

#[tokio::test]
async fn test_empty_critic_output_is_validation_failure() {
    let generator = ScriptedGenerator::new()
        .reply(StageName::Reflector, &revise("Too short."))
        .reply(StageName::Critic, "   ");
    let h = Harness::new(generator, ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    match &result.reason {
        CompletionReason::Failed { stage, error } => {
            assert_eq!(*stage, Some(StageName::Critic));
            assert_eq!(error.class(), "validation");
        }
        other => panic!("expected failure, got {other}"),
    }
    assert_eq!(result.state.revision_count(), 0);
}

#[tokio::test]
async fn test_empty_draft_is_validation_failure() {
    let generator = ScriptedGenerator::new().reply(StageName::Drafter, "");
    let h = Harness::new(generator, ScriptedSearch::new());
    let result = h
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(result.reason.to_string(), "failed(validation)");
    assert_eq!(h.generator.calls(StageName::Reflector), 0);
}

#[tokio::test]
async fn test_replay_with_same_scripts_is_deterministic() {
    let first = Harness::new(never_satisfied(), ScriptedSearch::new());
    let second = Harness::new(never_satisfied(), ScriptedSearch::new());

    let a = first
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await
        .state;
    let b = second
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await
        .state;

    assert_ne!(a.id(), b.id());
    assert_eq!(a.plan(), b.plan());
    assert_eq!(a.queries(), b.queries());
    assert_eq!(a.research_notes(), b.research_notes());
    assert_eq!(a.draft(), b.draft());
    assert_eq!(a.critique(), b.critique());
    assert_eq!(a.revision_count(), b.revision_count());
    assert_eq!(a.status(), b.status());
    assert_eq!(a.history(), b.history());
}

#[tokio::test]
async fn test_parallel_queries_keep_query_order() {
    let h = Harness::new(never_satisfied(), ScriptedSearch::new());
    let settings = StageSettings {
        parallel_queries: true,
        ..StageSettings::default()
    };
    let orchestrator = Orchestrator::new(h.deps().with_settings(settings));

    let result = orchestrator.run(WorkflowRequest::new("Tidal power", 2)).await;
    let sequential = Harness::new(never_satisfied(), ScriptedSearch::new())
        .orchestrator()
        .run(WorkflowRequest::new("Tidal power", 2))
        .await;

    assert_eq!(result.state.research_notes(), sequential.state.research_notes());
}

#[tokio::test]
async fn test_snapshots_never_lose_research_notes() {
    let h = Harness::new(never_satisfied(), ScriptedSearch::new());
    let request = WorkflowRequest::new("Tidal power", 2);
    let (tx, mut rx) = watch::channel(RunSnapshot::new(WorkflowState::new(&request)));

    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update();
            seen.push((snapshot.state.research_notes().len(), snapshot.state.revision_count()));
        }
        seen
    });

    let control = RunControl {
        cancel: CancellationToken::new(),
        snapshots: Some(tx),
        commands: None,
    };
    let result = h.orchestrator().run_with(request, control).await;
    let seen = collector.await.unwrap();

    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
    assert_eq!(
        seen.last().map(|s| s.0),
        Some(result.state.research_notes().len())
    );
}

#[tokio::test]
async fn test_interrupt_without_control_channel_runs_through() {
    let h = Harness::new(ScriptedGenerator::new(), ScriptedSearch::new());
    let request = WorkflowRequest::new("Tidal power", 2)
        .with_interrupt_after([StageName::Planner, StageName::Drafter]);
    let result = h.orchestrator().run(request).await;
    assert_eq!(result.reason, CompletionReason::Satisfied);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new(ScriptedGenerator::new(), ScriptedSearch::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h
        .orchestrator()
        .run_with(
            WorkflowRequest::new("Tidal power", 2),
            RunControl::detached(cancel),
        )
        .await;

    assert_eq!(result.reason, CompletionReason::Cancelled);
    assert_eq!(result.state.status(), Status::Failed);
    assert_eq!(h.generator.calls(StageName::Planner), 0);
    assert_eq!(h.sink.saved().len(), 1);
}
