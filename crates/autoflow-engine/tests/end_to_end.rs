//! Stored workflows run against wiremock-backed HTTP adapters.

use std::sync::Arc;
use std::time::Duration;

use autoflow_adapters::{
    ChatAdapter, Credential, Integration, MailAdapter, NotesAdapter, RetryPolicy,
    StaticCredentials, TextGenerationAdapter,
};
use autoflow_engine::{
    AdapterSet, Orchestrator, RunOutcome, WorkflowDefinition, save_definition, validate,
};
use autoflow_store::{Database, WorkflowStore};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn store() -> WorkflowStore {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    WorkflowStore::new(db)
}

fn adapters(server: &MockServer) -> AdapterSet {
    let creds = StaticCredentials::new();
    for integration in Integration::ALL {
        creds.insert_default(integration, Credential::new("tok"));
    }
    let creds: Arc<StaticCredentials> = Arc::new(creds);
    AdapterSet::new(
        Arc::new(MailAdapter::new("mail", creds.clone()).with_base_url(format!("{}/gmail", server.uri()))),
        Arc::new(NotesAdapter::new("notes", creds.clone()).with_base_url(format!("{}/notion", server.uri()))),
        Arc::new(ChatAdapter::new("chat", creds.clone()).with_base_url(format!("{}/telegram", server.uri()))),
        Arc::new(
            TextGenerationAdapter::new("ai", creds)
                .with_base_url(format!("{}/ai", server.uri()))
                .with_retry_policy(RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(5),
                }),
        ),
    )
}

fn definition(id: &str, actions: Value) -> WorkflowDefinition {
    let mut steps = vec![json!({"role": "trigger", "integration": "gmail", "operation": "new_email"})];
    if let Value::Array(items) = actions {
        steps.extend(items);
    }
    WorkflowDefinition::from_json(json!({
        "id": id, "user_id": "user-1", "name": "e2e", "steps": steps
    }))
    .unwrap()
}

async fn bodies(server: &MockServer, path_suffix: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path().ends_with(path_suffix))
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

#[tokio::test]
async fn summary_lands_in_a_note_and_a_chat_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ai/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "m",
            "choices": [{"message": {"content": "Summary text"}}],
            "usage": {"total_tokens": 12}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/notion/pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc123", "url": "https://notion.so/abc123", "created_time": "2026-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/telegram/bottok/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true, "result": {"message_id": 7, "date": 1700000000}
        })))
        .mount(&server)
        .await;

    let store = store().await;
    let def = definition("wf-e2e", json!([
        {"role": "action", "integration": "ai", "operation": "process_text",
         "config": {"prompt": "Summarize", "content": "{{body}}"}, "order": 1},
        {"role": "action", "integration": "notion", "operation": "create_page",
         "config": {"database_id": "db-1", "title": "{{subject}}", "content": "{{ai_content}}"}, "order": 2},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "42", "message": "Created {{steps.2.output}}: {{steps.1.output}}"}, "order": 3}
    ]));
    assert!(validate(&def).is_valid());
    save_definition(&store, &def).await.unwrap();

    let store = Arc::new(store);
    let orchestrator = Orchestrator::new(adapters(&server))
        .with_source(store.clone())
        .with_recorder(store.clone());

    let report = orchestrator
        .run_workflow("wf-e2e", &json!({"subject": "Invoice #42", "sender": "a@b.com", "body": "Pay me"}))
        .await;

    assert!(report.success, "{report:#?}");
    assert_eq!(report.executed_steps, 3);

    let pages = bodies(&server, "/pages").await;
    let page = &pages[0];
    assert_eq!(page["parent"]["database_id"], "db-1");
    assert!(page["children"].to_string().contains("Summary text"));

    let messages = bodies(&server, "/sendMessage").await;
    assert_eq!(messages[0]["text"], "Created abc123: Summary text");

    let stored = store.get("wf-e2e").await.unwrap().unwrap();
    assert_eq!(stored.total_executions, 1);
    assert_eq!(stored.successful_executions, 1);
    assert!(stored.last_executed_at.is_some());
}

#[tokio::test]
async fn unauthorized_mail_halts_and_is_recorded_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gmail/messages/send"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "Invalid Credentials"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/telegram/bottok/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(store().await);
    let def = definition("wf-401", json!([
        {"role": "action", "integration": "gmail", "operation": "send_email",
         "config": {"to": "x@y.com", "subject": "Re: {{subject}}", "body": "Thanks"}, "order": 1},
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "42", "message": "sent"}, "order": 2}
    ]));
    save_definition(&store, &def).await.unwrap();

    let orchestrator = Orchestrator::new(adapters(&server))
        .with_source(store.clone())
        .with_recorder(store.clone());
    let report = orchestrator.run_workflow("wf-401", &json!({"subject": "Hi"})).await;

    assert!(!report.success);
    assert_eq!(report.outcome, RunOutcome::Halted);
    assert_eq!(report.executed_steps, 1);
    assert!(report.step_results[0].error.as_deref().unwrap().contains("401"));

    let stored = store.get("wf-401").await.unwrap().unwrap();
    assert_eq!(stored.total_executions, 1);
    assert_eq!(stored.failed_executions, 1);
    let runs = store.list_runs("wf-401", 5).await.unwrap();
    assert_eq!(runs[0].outcome, "halted");
}

#[tokio::test]
async fn missing_and_disabled_workflows_fail_without_statistics() {
    let server = MockServer::start().await;
    let store = Arc::new(store().await);
    let mut def = definition("wf-off", json!([
        {"role": "action", "integration": "telegram", "operation": "send_message",
         "config": {"chat_id": "42", "message": "x"}, "order": 1}
    ]));
    def.enabled = false;
    save_definition(&store, &def).await.unwrap();

    let orchestrator = Orchestrator::new(adapters(&server))
        .with_source(store.clone())
        .with_recorder(store.clone());

    let missing = orchestrator.run_workflow("nope", &Value::Null).await;
    assert_eq!(missing.outcome, RunOutcome::Failed);
    assert!(missing.error.as_deref().unwrap().contains("not found"));

    let disabled = orchestrator.run_workflow("wf-off", &Value::Null).await;
    assert_eq!(disabled.outcome, RunOutcome::Failed);
    assert!(disabled.error.as_deref().unwrap().contains("disabled"));

    let stored = store.get("wf-off").await.unwrap().unwrap();
    assert_eq!(stored.total_executions, 0);
    assert!(store.list_runs("wf-off", 5).await.unwrap().is_empty());
    assert!(!orchestrator.lock().is_held("wf-off"));
}
