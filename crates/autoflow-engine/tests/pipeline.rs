//! Orchestrator behaviour with in-process fake adapters.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autoflow_adapters::{
    AdapterError, ExecutionContext, Integration, Operation, ServiceAdapter, StepErrorKind,
};
use autoflow_engine::{
    AdapterSet, EngineConfig, EngineError, Orchestrator, RunOutcome, RunRecorder, RunReport,
    WorkflowDefinition,
};
use serde_json::{Value, json};

// ═══════════════════════════════════════════════════════════════════════
//  Fakes
// ═══════════════════════════════════════════════════════════════════════

enum Reply {
    Payload(Value),
    Fail(fn() -> AdapterError),
    /// Text generation: store the text in `ai_content` and return it.
    Generate(&'static str),
    Sleep(Duration, Value),
}

/// Adapter that records resolved configurations and replays scripted replies.
/// With no script left it echoes the configuration back.
struct Fake {
    integration: Integration,
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Value>>,
}

impl Fake {
    fn new(integration: Integration) -> Arc<Self> {
        Arc::new(Self {
            integration,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn then(self: &Arc<Self>, reply: Reply) -> Arc<Self> {
        self.script.lock().unwrap().push_back(reply);
        Arc::clone(self)
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceAdapter for Fake {
    fn id(&self) -> &str {
        "fake"
    }

    fn integration(&self) -> Integration {
        self.integration
    }

    async fn execute(
        &self,
        operation: Operation,
        config: &Value,
        ctx: &mut ExecutionContext,
    ) -> autoflow_adapters::Result<Value> {
        self.ensure_supported(operation)?;
        self.calls.lock().unwrap().push(config.clone());
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            None => Ok(config.clone()),
            Some(Reply::Payload(payload)) => Ok(payload),
            Some(Reply::Fail(make)) => Err(make()),
            Some(Reply::Generate(text)) => {
                ctx.set_variable("ai_content", text);
                Ok(json!({"content": text, "model": "fake", "attempts": 1}))
            }
            Some(Reply::Sleep(duration, payload)) => {
                tokio::time::sleep(duration).await;
                Ok(payload)
            }
        }
    }
}

struct Fakes {
    mail: Arc<Fake>,
    notes: Arc<Fake>,
    chat: Arc<Fake>,
    ai: Arc<Fake>,
}

impl Fakes {
    fn new() -> Self {
        Self {
            mail: Fake::new(Integration::Mail),
            notes: Fake::new(Integration::Notes),
            chat: Fake::new(Integration::Chat),
            ai: Fake::new(Integration::TextGeneration),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(AdapterSet::new(
            self.mail.clone(),
            self.notes.clone(),
            self.chat.clone(),
            self.ai.clone(),
        ))
    }
}

#[derive(Default)]
struct Recorded(Mutex<Vec<RunReport>>);

#[async_trait]
impl RunRecorder for Recorded {
    async fn record(&self, report: &RunReport) -> autoflow_engine::Result<()> {
        self.0.lock().unwrap().push(report.clone());
        Ok(())
    }
}

struct BrokenRecorder;

#[async_trait]
impl RunRecorder for BrokenRecorder {
    async fn record(&self, _report: &RunReport) -> autoflow_engine::Result<()> {
        Err(EngineError::InvalidDefinition {
            reason: "disk full".into(),
        })
    }
}

fn workflow(actions: Value) -> WorkflowDefinition {
    let mut steps = vec![json!({"id": "trigger", "role": "trigger", "integration": "gmail", "operation": "new_email"})];
    if let Value::Array(items) = actions {
        steps.extend(items);
    }
    WorkflowDefinition::from_json(json!({"id": "wf-1", "user_id": "user-1", "steps": steps})).unwrap()
}

fn email_trigger() -> Value {
    json!({"subject": "Invoice #42", "sender": "a@b.com", "body": "Please pay."})
}

fn unauthorized() -> AdapterError {
    AdapterError::Credential {
        service: "gmail",
        reason: "HTTP 401: invalid credentials".into(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_message_uses_trigger_subject() {
    let fakes = Fakes::new();
    let def = workflow(json!([
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "42", "message": "New email: {{subject}}"}, "order": 1}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &email_trigger()).await;

    assert!(report.success);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(fakes.chat.calls()[0]["message"], "New email: Invoice #42");
}

#[tokio::test]
async fn generated_text_reaches_later_steps_by_both_names() {
    let fakes = Fakes::new();
    fakes.ai.then(Reply::Generate("Summary text"));
    let def = workflow(json!([
        {"role": "action", "integration": "ai", "operation": "process_text",
         "config": {"prompt": "Summarize", "content": "{{body}}"}, "order": 1},
        {"role": "action", "integration": "notion", "operation": "create_page",
         "config": {"database_id": "db", "title": "{{subject}}", "content": "{{ai_content}}"}, "order": 2},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "42", "message": "{{steps.1.output}}|{{ai_content}}"}, "order": 3}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &email_trigger()).await;

    assert!(report.success, "{report:?}");
    assert_eq!(fakes.ai.calls()[0]["content"], "Please pay.");
    assert_eq!(fakes.notes.calls()[0]["content"], "Summary text");
    assert_eq!(fakes.chat.calls()[0]["message"], "Summary text|Summary text");
}

#[tokio::test]
async fn step_output_addresses_created_page() {
    let fakes = Fakes::new();
    fakes.notes.then(Reply::Payload(json!({"pageId": "abc123", "url": "https://notes.example/abc123"})));
    let def = workflow(json!([
        {"role": "action", "integration": "notion", "operation": "create_page",
         "config": {"database_id": "db", "title": "t"}, "order": 1},
        {"role": "action", "integration": "ai", "operation": "process_text",
         "config": {"prompt": "p"}, "order": 2},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "1", "message": "Created {{steps.1.output}}", "link": "{{steps.1.data.url}}"}, "order": 3}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &email_trigger()).await;

    assert!(report.success);
    let sent = &fakes.chat.calls()[0];
    assert_eq!(sent["message"], "Created abc123");
    assert_eq!(sent["link"], "https://notes.example/abc123");
}

#[tokio::test]
async fn successful_steps_publish_flat_step_variables() {
    let fakes = Fakes::new();
    fakes.notes.then(Reply::Payload(json!({"page_id": "p-9", "url": "https://notes.example/p-9"})));
    fakes.ai.then(Reply::Generate("Short summary"));
    fakes.mail.then(Reply::Payload(json!({"message_id": "m-4", "thread_id": "t-4"})));
    let def = workflow(json!([
        {"role": "action", "integration": "notion", "operation": "create_page",
         "config": {"database_id": "db", "title": "{{subject}}"}, "order": 1},
        {"role": "action", "integration": "ai", "operation": "process_text",
         "config": {"prompt": "Summarize {{step_1_notion_url}}"}, "order": 2},
        {"role": "action", "integration": "gmail", "operation": "send_email",
         "config": {"to": "ops@example.com", "subject": "s", "body": "{{step_2_ai_content}}"}, "order": 3},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "1",
                    "message": "{{step_1_output}} {{step_1_notion_page_id}} {{step_3_message_id}} {{step_2_output}}"},
         "order": 4}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &email_trigger()).await;

    assert!(report.success, "{report:?}");
    assert_eq!(fakes.ai.calls()[0]["prompt"], "Summarize https://notes.example/p-9");
    assert_eq!(fakes.mail.calls()[0]["body"], "Short summary");
    assert_eq!(fakes.chat.calls()[0]["message"], "p-9 p-9 m-4 Short summary");
    assert!(report.step_results.iter().all(|r| r.warnings.is_empty()));
}

#[tokio::test]
async fn fetched_email_replaces_trigger_fields() {
    let fakes = Fakes::new();
    fakes.mail.then(Reply::Payload(json!({
        "count": 1,
        "emails": [{
            "id": "e-1",
            "thread_id": "t-1",
            "subject": "Fetched subject",
            "sender": "ann@x.io",
            "from": "Ann <ann@x.io>",
            "body": "fetched body",
            "timestamp": "2024-03-06T09:30:00+00:00"
        }]
    })));
    let def = workflow(json!([
        {"role": "action", "integration": "gmail", "operation": "fetch_emails",
         "config": {"query": "is:unread"}, "order": 1},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "1", "message": "{{subject}} / {{sender}} / {{body}} / {{date}} / {{step_1_output}}"},
         "order": 2}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &email_trigger()).await;

    assert!(report.success, "{report:?}");
    assert_eq!(
        fakes.chat.calls()[0]["message"],
        "Fetched subject / ann@x.io / fetched body / 2024-03-06 / e-1"
    );
}

#[tokio::test]
async fn empty_fetch_keeps_trigger_fields() {
    let fakes = Fakes::new();
    fakes.mail.then(Reply::Payload(json!({"count": 0, "emails": []})));
    let def = workflow(json!([
        {"role": "action", "integration": "gmail", "operation": "fetch_emails", "config": {}, "order": 1},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "1", "message": "{{subject}}"}, "order": 2}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &email_trigger()).await;

    assert!(report.success);
    assert_eq!(fakes.chat.calls()[0]["message"], "Invoice #42");
}

#[tokio::test]
async fn concurrent_runs_of_one_workflow_yield_one_skip() {
    let fakes = Fakes::new();
    fakes.chat.then(Reply::Sleep(Duration::from_millis(100), json!({"message_id": 1})));
    let orchestrator = fakes.orchestrator();
    let other = orchestrator.clone();
    let def = workflow(json!([
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "1", "message": "x"}, "order": 1}
    ]));
    let trigger = email_trigger();

    let (first, second) = tokio::join!(
        orchestrator.run_definition(&def, &trigger),
        other.run_definition(&def, &trigger)
    );

    let (ran, skipped) = if first.is_skipped() { (second, first) } else { (first, second) };
    assert_eq!(ran.outcome, RunOutcome::Completed);
    assert!(ran.executed_steps > 0);
    assert_eq!(skipped.outcome, RunOutcome::Skipped);
    assert_eq!(skipped.executed_steps, 0);
    assert!(skipped.error.is_none());
    assert_eq!(fakes.chat.calls().len(), 1);
    assert!(!orchestrator.lock().is_held("wf-1"));
}

#[tokio::test]
async fn different_workflows_do_not_contend() {
    let fakes = Fakes::new();
    fakes
        .chat
        .then(Reply::Sleep(Duration::from_millis(50), json!({})))
        .then(Reply::Sleep(Duration::from_millis(50), json!({})));
    let orchestrator = fakes.orchestrator();
    let first = workflow(json!([{"role": "action", "integration": "chat", "operation": "send", "config": {}}]));
    let mut second = first.clone();
    second.id = "wf-2".into();

    let (a, b) = tokio::join!(
        orchestrator.run_definition(&first, &Value::Null),
        orchestrator.run_definition(&second, &Value::Null)
    );
    assert!(!a.is_skipped());
    assert!(!b.is_skipped());
}

#[tokio::test]
async fn credential_failure_halts_the_run() {
    let fakes = Fakes::new();
    fakes.mail.then(Reply::Fail(unauthorized));
    let recorder = Arc::new(Recorded::default());
    let orchestrator = fakes.orchestrator().with_recorder(recorder.clone());
    let def = workflow(json!([
        {"role": "action", "integration": "gmail", "operation": "send_email",
         "config": {"to": "x@y.com", "subject": "s", "body": "b"}, "order": 1},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "1", "message": "never"}, "order": 2}
    ]));

    let report = orchestrator.run_definition(&def, &email_trigger()).await;

    assert!(!report.success);
    assert_eq!(report.outcome, RunOutcome::Halted);
    assert_eq!(report.executed_steps, 1);
    assert_eq!(report.step_results.len(), 1);
    let failed = &report.step_results[0];
    assert_eq!(failed.error_kind, Some(StepErrorKind::Credential));
    assert!(failed.error.as_deref().unwrap().starts_with("credential: "));
    assert!(fakes.chat.calls().is_empty());

    let recorded = recorder.0.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].outcome, RunOutcome::Halted);
}

#[tokio::test]
async fn halts_at_the_failing_step() {
    let fakes = Fakes::new();
    fakes.notes.then(Reply::Payload(json!({"page_id": "p"})));
    fakes.ai.then(Reply::Fail(|| AdapterError::EmptyContent { service: "ai" }));
    let def = workflow(json!([
        {"role": "action", "integration": "notion", "operation": "create_page", "config": {}, "order": 1},
        {"role": "action", "integration": "ai", "operation": "process_text", "config": {}, "order": 2},
        {"role": "action", "integration": "chat", "operation": "send", "config": {}, "order": 3},
        {"role": "action", "integration": "mail", "operation": "send", "config": {}, "order": 4}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &Value::Null).await;

    assert_eq!(report.executed_steps, 2);
    let indices: Vec<usize> = report.step_results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert!(report.step_results[0].success);
    assert!(!report.step_results[1].success);
    assert!(fakes.chat.calls().is_empty());
    assert!(fakes.mail.calls().is_empty());
    assert!(report.error.as_deref().unwrap().contains("step 2"));
}

#[tokio::test]
async fn missing_variable_does_not_stop_the_run() {
    let fakes = Fakes::new();
    let def = workflow(json!([
        {"role": "action", "integration": "chat", "operation": "send", "config": {"message": "{{missingVar}}"}, "order": 1},
        {"role": "action", "integration": "chat", "operation": "send", "config": {"message": "{{steps.99.output}}"}, "order": 2}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &Value::Null).await;

    assert!(report.success);
    assert_eq!(report.executed_steps, 2);
    let calls = fakes.chat.calls();
    assert_eq!(calls[0]["message"], "");
    assert_eq!(calls[1]["message"], "");
    assert_eq!(report.step_results[1].warnings.len(), 1);
}

#[tokio::test]
async fn actions_run_in_order_index_sequence() {
    let fakes = Fakes::new();
    let def = workflow(json!([
        {"id": "late", "role": "action", "integration": "chat", "operation": "send", "config": {"n": "second"}, "order": 5},
        {"id": "early", "role": "action", "integration": "chat", "operation": "send", "config": {"n": "first"}, "order": 2}
    ]));

    let report = fakes.orchestrator().run_definition(&def, &Value::Null).await;

    let ids: Vec<&str> = report.step_results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late"]);
    let order: Vec<Value> = fakes.chat.calls().into_iter().map(|c| c["n"].clone()).collect();
    assert_eq!(order, vec![json!("first"), json!("second")]);
}

#[tokio::test]
async fn step_timeout_fails_the_step() {
    let fakes = Fakes::new();
    fakes.chat.then(Reply::Sleep(Duration::from_secs(5), json!({})));
    let orchestrator = fakes
        .orchestrator()
        .with_config(EngineConfig::default().with_step_timeout(Duration::from_millis(20)));
    let def = workflow(json!([
        {"role": "action", "integration": "chat", "operation": "send", "config": {}, "order": 1}
    ]));

    let report = orchestrator.run_definition(&def, &Value::Null).await;

    assert_eq!(report.outcome, RunOutcome::Halted);
    assert_eq!(report.step_results[0].error_kind, Some(StepErrorKind::Timeout));
    assert!(!orchestrator.lock().is_held("wf-1"));
}

#[tokio::test]
async fn skipped_runs_are_not_recorded() {
    let fakes = Fakes::new();
    let recorder = Arc::new(Recorded::default());
    let orchestrator = fakes.orchestrator().with_recorder(recorder.clone());
    let def = workflow(json!([{"role": "action", "integration": "chat", "operation": "send", "config": {}}]));

    let _held = orchestrator.lock().guard("wf-1").unwrap();
    let report = orchestrator.run_definition(&def, &Value::Null).await;

    assert!(report.is_skipped());
    assert!(recorder.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn recorder_failure_keeps_the_report() {
    let fakes = Fakes::new();
    let orchestrator = fakes.orchestrator().with_recorder(Arc::new(BrokenRecorder));
    let def = workflow(json!([{"role": "action", "integration": "chat", "operation": "send", "config": {}}]));

    let report = orchestrator.run_definition(&def, &Value::Null).await;

    assert!(report.success);
    assert_eq!(report.outcome, RunOutcome::Completed);
}

#[tokio::test]
async fn trigger_fields_reach_templates() {
    let fakes = Fakes::new();
    let def = workflow(json!([
        {"role": "action", "integration": "chat", "operation": "send",
         "config": {"message": "{{sender}} {{from}} {{trigger.priority}} {{workflow_id}}"}, "order": 1}
    ]));
    let trigger = json!({"from": "Ann <ann@example.com>", "subject": "s", "priority": "high"});

    fakes.orchestrator().run_definition(&def, &trigger).await;

    assert_eq!(
        fakes.chat.calls()[0]["message"],
        "ann@example.com Ann <ann@example.com> high wf-1"
    );
}
