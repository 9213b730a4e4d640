//! End-to-end scenarios against the public crate surface.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use budget_router::config::{LocalModels, Settings};
use budget_router::failure::FailureTracker;
use budget_router::hooks::HookSubscriber;
use budget_router::ledger::legacy::{BudgetAction, LegacyBudget};
use budget_router::ledger::usage::TurnUsage;
use budget_router::ledger::BudgetLedger;
use budget_router::providers::{ProviderChain, ProviderDescriptor, ProviderModels, TaskKind};
use budget_router::routing::switcher::{ModelSwitcher, SwitchMode, SwitcherState};
use budget_router::routing::Router;
use budget_router::session::{read_log, truncate_log, TruncationOutcome};
use budget_router::{AgentStartEvent, BudgetRouter, Decision};

fn test_settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::from_env();
    settings.chain_mode = true;
    settings.data_dir = dir.join("data");
    settings.host_config_path = dir.join("openclaw.json");
    settings.sessions_dir = dir.join("sessions");
    settings.restart_command = "true".to_string();
    settings
}

fn provider(id: &str, priority: i64, max_daily_usd: f64) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.to_string(),
        priority,
        enabled: true,
        max_daily_usd,
        models: ProviderModels::uniform(format!("{id}-default")),
    }
}

fn spend(ledger: &mut BudgetLedger, chain: &ProviderChain, provider: &str, cost_usd: f64) {
    ledger
        .record_transaction(
            chain,
            provider,
            &TurnUsage {
                model: format!("{provider}/{provider}-default"),
                input_tokens: 1000,
                output_tokens: 500,
                cost_usd,
            },
        )
        .unwrap();
}

#[test]
fn legacy_over_budget_forces_local_general_model() {
    let dir = tempfile::tempdir().unwrap();
    let mut budget = LegacyBudget::load(&dir.path().join("budget.json"), 5.0).unwrap();
    budget
        .record(&TurnUsage {
            model: "claude-sonnet-4-20250514".to_string(),
            input_tokens: 100_000,
            output_tokens: 40_000,
            cost_usd: 5.5,
        })
        .unwrap();

    let check = budget.check_budget("what changed today?", &[], &LocalModels::default());
    assert_eq!(check.action, BudgetAction::ForceLocal);
    assert_eq!(check.forced_model.as_deref(), Some("qwen3:8b"));
    assert_eq!(check.task_type, TaskKind::General);
    assert!(check.remaining <= 0.0);
}

#[test]
fn legacy_coding_task_routes_to_the_coder_model() {
    let dir = tempfile::tempdir().unwrap();
    let mut budget = LegacyBudget::load(&dir.path().join("budget.json"), 5.0).unwrap();
    budget
        .record(&TurnUsage {
            model: "claude-sonnet-4-20250514".to_string(),
            input_tokens: 1000,
            output_tokens: 1000,
            cost_usd: 6.0,
        })
        .unwrap();

    let check = budget.check_budget("fix the bug in my code", &[], &LocalModels::default());
    assert_eq!(check.forced_model.as_deref(), Some("qwen3-coder:30b"));
    assert_eq!(check.task_type, TaskKind::Coding);
}

#[test]
fn vision_dominates_coding_signals() {
    let dir = tempfile::tempdir().unwrap();
    let mut budget = LegacyBudget::load(&dir.path().join("budget.json"), 5.0).unwrap();
    budget
        .record(&TurnUsage {
            model: "claude-sonnet-4-20250514".to_string(),
            input_tokens: 1000,
            output_tokens: 1000,
            cost_usd: 6.0,
        })
        .unwrap();

    let messages = vec![json!({
        "role": "user",
        "content": [
            {"type": "text", "text": "debug this function"},
            {"type": "image", "source": {"media_type": "image/png", "data": "…"}}
        ]
    })];
    let check = budget.check_budget("debug this function", &messages, &LocalModels::default());
    assert_eq!(check.task_type, TaskKind::Vision);
    assert_eq!(check.forced_model.as_deref(), Some("qwen3-vl:8b"));
}

#[test]
fn chain_exhaustion_cascades_to_the_free_provider() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let chain = ProviderChain::from_providers(vec![
        provider("provider-a", 1, 3.0),
        provider("provider-b", 2, 2.0),
        provider("provider-c", 3, 1.0),
        ProviderDescriptor {
            id: "ollama".to_string(),
            priority: 100,
            enabled: true,
            max_daily_usd: 0.0,
            models: ProviderModels::uniform("qwen3:8b"),
        },
    ]);
    let mut ledger = BudgetLedger::load(&settings.ledger_path(), &chain).unwrap();
    let failures = FailureTracker::load(&settings.failure_path()).unwrap();
    let router = Router::new(&chain, &settings);

    for (current, cap, expected_next) in [
        ("provider-a", 3.0, "provider-b"),
        ("provider-b", 2.0, "provider-c"),
        ("provider-c", 1.0, "ollama"),
    ] {
        spend(&mut ledger, &chain, current, cap + 0.05);
        match router.decide(&ledger, &failures, "hello there", &[]) {
            Decision::SwitchProvider { next, .. } => assert_eq!(next, expected_next),
            other => panic!("expected switch away from {current}, got {other:?}"),
        }
        ledger.set_active(expected_next).unwrap();
    }

    match router.decide(&ledger, &failures, "hello there", &[]) {
        Decision::Allow { provider, .. } => assert_eq!(provider, "ollama"),
        other => panic!("expected allow on the free provider, got {other:?}"),
    }
}

#[test]
fn three_failures_switch_and_one_success_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let chain = ProviderChain::from_providers(vec![
        provider("provider-a", 1, 10.0),
        provider("provider-b", 2, 10.0),
    ]);
    let ledger = BudgetLedger::load(&settings.ledger_path(), &chain).unwrap();
    let mut failures = FailureTracker::load(&settings.failure_path()).unwrap();
    let router = Router::new(&chain, &settings);

    for expected in 1..=3u32 {
        let count = failures.record_failure("provider-a").unwrap();
        assert_eq!(count, expected);
    }
    assert!(failures.should_switch("provider-a", 3));

    // Budget is untouched, yet the failures alone force the switch.
    assert!(ledger.remaining(&chain, "provider-a") > 0.0);
    match router.decide(&ledger, &failures, "hello", &[]) {
        Decision::SwitchProvider { next, .. } => assert_eq!(next, "provider-b"),
        other => panic!("expected failure-driven switch, got {other:?}"),
    }

    failures.record_success("provider-a").unwrap();
    assert_eq!(failures.count("provider-a"), 0);
    match router.decide(&ledger, &failures, "hello", &[]) {
        Decision::Allow { provider, .. } => assert_eq!(provider, "provider-a"),
        other => panic!("expected allow after recovery, got {other:?}"),
    }
}

#[test]
fn truncation_keeps_structure_and_relinks_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");

    let mut lines = vec![
        json!({"type": "session", "id": "s-0", "parentId": null, "version": "1.4.2"}),
        json!({"type": "model_change", "id": "s-1", "parentId": "s-0", "model": "sonnet"}),
    ];
    let mut parent = "s-1".to_string();
    for i in 0..30 {
        let id = format!("m-{i}");
        lines.push(json!({
            "type": "message",
            "id": id,
            "parentId": parent,
            "message": {"role": "user", "content": "x".repeat(2000)}
        }));
        parent = id;
    }
    let body: String = lines
        .iter()
        .map(|line| format!("{line}\n"))
        .collect();
    std::fs::write(&path, body).unwrap();

    let outcome = truncate_log(&path, 1000, 5).unwrap();
    assert_eq!(outcome, TruncationOutcome::Truncated { removed: 25 });

    let entries = read_log(&path).unwrap().unwrap();
    assert_eq!(
        entries.iter().filter(|e| e.kind == "session").count(),
        1
    );
    assert_eq!(
        entries.iter().filter(|e| e.kind == "model_change").count(),
        1
    );
    assert_eq!(
        entries.iter().filter(|e| e.kind == "compaction").count(),
        1
    );
    assert_eq!(
        entries.iter().filter(|e| e.kind == "message").count(),
        5
    );

    assert_eq!(entries[0].parent_id, None);
    for window in entries.windows(2) {
        assert_eq!(window[1].parent_id.as_deref(), Some(window[0].id.as_str()));
    }

    // The structural entry kept its host-private field through the rewrite.
    let session_entry = entries.iter().find(|e| e.kind == "session").unwrap();
    assert_eq!(
        session_entry.extra.get("version"),
        Some(&Value::String("1.4.2".to_string()))
    );
}

#[tokio::test]
async fn day_rollover_restores_the_original_model_once() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());

    // Host sits on the local fallback from yesterday.
    std::fs::create_dir_all(&settings.data_dir).unwrap();
    std::fs::write(
        &settings.host_config_path,
        serde_json::to_string_pretty(&json!({
            "agents": {"defaults": {
                "model": {"primary": "ollama/qwen3:8b"},
                "models": {"ollama/qwen3:8b": {}}
            }}
        }))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        settings.switcher_state_path(),
        serde_json::to_string_pretty(&SwitcherState {
            mode: SwitchMode::Local,
            original_model: "anthropic/claude-sonnet-4-20250514".to_string(),
            switched_at: "2020-01-01T18:00:00Z".to_string(),
            switched_model_id: "ollama/qwen3:8b".to_string(),
        })
        .unwrap(),
    )
    .unwrap();

    // Yesterday's ledger, fully exhausted.
    let chain = ProviderChain::load(&settings.chain_path(), &settings.local_models).unwrap();
    {
        let mut ledger = BudgetLedger::load(&settings.ledger_path(), &chain).unwrap();
        spend(&mut ledger, &chain, "anthropic", 11.0);
        let mut doc = ledger.document().clone();
        doc.date = "2020-01-01".to_string();
        budget_router::storage::write_json(&settings.ledger_path(), &doc).unwrap();
    }

    // First event of the new day.
    let router = BudgetRouter::new(settings.clone());
    router
        .before_agent_start(&AgentStartEvent::default())
        .await;

    let switcher = ModelSwitcher::new(&settings);
    assert!(switcher.state().is_none());
    let host: Value =
        serde_json::from_str(&std::fs::read_to_string(&settings.host_config_path).unwrap())
            .unwrap();
    assert_eq!(
        host.pointer("/agents/defaults/model/primary"),
        Some(&json!("anthropic/claude-sonnet-4-20250514"))
    );

    // The fresh ledger starts over on the paid provider.
    let ledger = BudgetLedger::load(&settings.ledger_path(), &chain).unwrap();
    assert_eq!(ledger.total_spent(), 0.0);
    assert_eq!(ledger.active_provider(), "anthropic");
}

#[tokio::test]
async fn sessions_index_drives_truncation_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.context_max_tokens = 800;
    settings.context_keep_recent = 4;
    settings.session_key = "agent:main:main".to_string();

    std::fs::create_dir_all(&settings.sessions_dir).unwrap();
    let mut lines = vec![json!({"type": "session", "id": "s-0", "parentId": null})];
    let mut parent = "s-0".to_string();
    for i in 0..20 {
        let id = format!("m-{i}");
        lines.push(json!({
            "type": "message",
            "id": id,
            "parentId": parent,
            "message": {"role": "assistant", "content": "y".repeat(1000)}
        }));
        parent = id;
    }
    let body: String = lines.iter().map(|line| format!("{line}\n")).collect();
    std::fs::write(settings.sessions_dir.join("agent-main-main.jsonl"), body).unwrap();
    budget_router::storage::write_json(
        &settings.sessions_index_path(),
        &BTreeMap::from([(
            "agent:main:main".to_string(),
            "agent-main-main.jsonl".to_string(),
        )]),
    )
    .unwrap();

    let truncator = budget_router::session::SessionTruncator::new(&settings);
    let outcome = truncator.enforce_budget().await.unwrap();
    assert_eq!(outcome, TruncationOutcome::Truncated { removed: 16 });

    let entries = read_log(&settings.sessions_dir.join("agent-main-main.jsonl"))
        .unwrap()
        .unwrap();
    let kept: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == "message")
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(kept, vec!["m-16", "m-17", "m-18", "m-19"]);
}
