//! 执行核心集成测试：产物编辑、工具调用修复、上下文压缩、计时预算、迭代上限与委派角色校验

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use deep_research::artifacts::{DurablePersistence, InMemoryPersistence};
use deep_research::config::AgentSection;
use deep_research::core::{build_pipeline, DeepAgentOrchestrator, Termination};
use deep_research::llm::{InvocationMode, ScriptedLlmClient};
use deep_research::memory::{Budget, ConversationTurn, Message, Role, TimerPhase, ToolCall};
use deep_research::middleware::{StageEffect, ToolCallRepair, SUMMARY_MESSAGE_NAME};

#[tokio::test]
async fn durable_edit_scenario() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_calls(vec![ToolCall::new(
        "w1",
        "write_file",
        json!({"path": "notes.md", "content": "draft", "tier": "durable"}),
    )]);
    llm.push_calls(vec![ToolCall::new(
        "e1",
        "edit_file",
        json!({"path": "notes.md", "old_string": "draft", "new_string": "final", "tier": "durable"}),
    )]);
    llm.push_calls(vec![ToolCall::new(
        "e2",
        "edit_file",
        json!({"path": "notes.md", "old_string": "draft", "new_string": "again", "tier": "durable"}),
    )]);
    llm.push_text("Done editing.");

    let persistence = Arc::new(InMemoryPersistence::new());
    let orchestrator = DeepAgentOrchestrator::new(AgentSection::default(), llm, persistence.clone())
        .unwrap()
        .with_thread_id("edit-thread");
    let result = orchestrator.execute("Keep notes").await.unwrap();

    assert_eq!(result.outcome, Termination::Success);
    assert_eq!(result.output, "Done editing.");
    let stored = persistence.get("edit-thread", "notes.md").await.unwrap();
    assert_eq!(stored.as_deref(), Some("final"));

    let log = &result.tool_calls;
    assert_eq!(log.len(), 3);
    assert!(log[0].ok && log[1].ok);
    // 第二次 edit 找不到 "draft"：错误文本交还模型，内容不变
    assert!(!log[2].ok);
    assert_eq!(result.artifacts_touched, vec!["durable:notes.md".to_string()]);
}

#[test]
fn repair_is_idempotent() {
    let mut turn = ConversationTurn::new();
    turn.push(Message::user("go"));
    turn.push(Message::assistant_with_calls(
        "",
        vec![
            ToolCall::new("a", "ls", json!({})),
            ToolCall::new("b", "ls", json!({})),
        ],
    ));
    turn.push(Message::tool_result("b", "B"));
    turn.push(Message::tool_result("ghost", "orphan"));
    turn.push(Message::tool_result("b", "duplicate"));

    let repair = ToolCallRepair;
    let (placeholders, dropped) = repair.repair(&mut turn);
    assert_eq!(placeholders, 1);
    assert_eq!(dropped, 2);

    let once = turn.clone();
    assert_eq!(repair.repair(&mut turn), (0, 0));
    assert_eq!(turn, once);

    // 每个调用恰有一条相邻结果
    let tool_ids: Vec<&str> = turn
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(tool_ids.len(), 2);
    assert!(tool_ids.contains(&"a") && tool_ids.contains(&"b"));
}

#[tokio::test]
async fn compaction_keeps_recency_window_byte_identical() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_summary("earlier reads digested");

    let mut agent = AgentSection::default();
    agent.token_ceiling = 400;
    agent.chars_per_token = 1.0;
    agent.recency_window_turns = 4;
    let pipeline = build_pipeline(&agent, llm.clone());

    let mut turn = ConversationTurn::new();
    turn.push(Message::user("Investigate the topic"));
    for i in 0..8 {
        let id = format!("r{i}");
        turn.push(Message::assistant_with_calls(
            "",
            vec![ToolCall::new(id.clone(), "read_file", json!({"path": "src.md"}))],
        ));
        turn.push(Message::tool_result(id, "y".repeat(60)));
    }
    let tail: Vec<Message> = turn.messages()[turn.len() - 4..].to_vec();
    let mut budget = Budget::new(agent.token_ceiling, Duration::from_secs(900));

    let effects = pipeline.run(&mut turn, &mut budget).await;
    assert!(effects
        .iter()
        .any(|e| matches!(e, StageEffect::Compacted { .. })));
    assert_eq!(&turn.messages()[turn.len() - 4..], tail.as_slice());
    assert_eq!(turn.messages()[0].content, "Investigate the topic");
    assert!(turn
        .messages()
        .iter()
        .any(|m| m.name.as_deref() == Some(SUMMARY_MESSAGE_NAME)));
    assert_eq!(llm.requests()[0].mode, InvocationMode::Summarize);
}

#[tokio::test(start_paused = true)]
async fn budget_nudges_are_monotonic() {
    let llm = Arc::new(ScriptedLlmClient::new());
    let agent = AgentSection::default();
    let pipeline = build_pipeline(&agent, llm);
    let mut turn = ConversationTurn::from_messages(vec![Message::user("brief")]);
    let mut budget = Budget::new(agent.token_ceiling, Duration::from_secs(100));

    let mut observed = Vec::new();
    for step in 0..12 {
        tokio::time::advance(Duration::from_secs(10)).await;
        if step % 2 == 0 {
            pipeline.run(&mut turn, &mut budget).await;
        } else {
            pipeline.dispatch_checkpoint(&mut turn, &mut budget);
        }
        observed.push((budget.elapsed_seconds, budget.nudges_sent, budget.timer_phase));
    }

    for pair in observed.windows(2) {
        assert!(pair[1].0 >= pair[0].0);
        assert!(pair[1].1 >= pair[0].1);
        assert!(pair[1].2 >= pair[0].2);
    }
    let nudges: Vec<u32> = observed.iter().map(|o| o.1).collect();
    assert!(nudges.contains(&1));
    assert_eq!(*nudges.last().unwrap(), 2);
    assert_eq!(budget.timer_phase, TimerPhase::Expired);
}

#[tokio::test]
async fn iteration_cap_through_orchestrator() {
    let llm = Arc::new(ScriptedLlmClient::new());
    for i in 0..10 {
        llm.push_calls(vec![ToolCall::new(format!("ls{i}"), "ls", json!({}))]);
    }
    let mut agent = AgentSection::default();
    agent.max_iterations_per_batch = 3;
    let orchestrator = DeepAgentOrchestrator::new(agent, llm.clone(), Arc::new(InMemoryPersistence::new())).unwrap();

    let result = orchestrator.execute("Loop forever").await.unwrap();
    assert_eq!(result.outcome, Termination::MaxIterationsExceeded);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.tool_calls.len(), 3);
    assert_eq!(llm.remaining(), 7);
}

#[tokio::test]
async fn unknown_role_is_reported_to_the_model() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_calls(vec![ToolCall::new(
        "d1",
        "delegate",
        json!({"role": "astrologer", "brief": "Read the stars"}),
    )]);
    llm.push_text("Proceeding without delegation.");
    let orchestrator =
        DeepAgentOrchestrator::new(AgentSection::default(), llm.clone(), Arc::new(InMemoryPersistence::new()))
            .unwrap();

    let result = orchestrator.execute("Research something").await.unwrap();
    assert_eq!(result.outcome, Termination::Success);
    assert_eq!(result.output, "Proceeding without delegation.");
    assert!(!result.tool_calls[0].ok);

    let second = &llm.requests()[1];
    let tool_result = second
        .messages
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some("d1"))
        .unwrap();
    assert!(tool_result.content.contains("Invalid role"));
    assert!(tool_result.content.contains("research"));
}
