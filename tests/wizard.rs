use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use onboard_cli::cli::run::{drive, ScriptedEvent};
use onboard_cli::{Config, InstallSession, SimulatedInstaller};
use serde_json::json;
use step_flow::FlowStatus;
use tokio::time::{sleep, timeout};

fn test_config(whitelist: &Path) -> Config {
    let mut config = Config::default();
    config.start_delay_ms = 0;
    config.installer.known_accounts = vec!["dev@kite.io".into()];
    config.installer.password = "hunter2".into();
    config.installer.download_chunks = 3;
    config.installer.chunk_delay_ms = 5;
    config.installer.whitelist_path = whitelist.to_path_buf();
    config
}

fn session(config: &Config) -> InstallSession {
    let installer = Arc::new(SimulatedInstaller::new(&config.installer));
    InstallSession::new(config, installer).unwrap()
}

fn scripted(event: &str, fields: &[(&str, &str)]) -> ScriptedEvent {
    ScriptedEvent {
        event: event.to_string(),
        fields: fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        delay_ms: 0,
    }
}

async fn until<F: Fn() -> bool>(what: &str, condition: F) {
    let reached = timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

async fn emit(session: &InstallSession, event: &str, fields: &[(&str, &str)]) {
    let engine = session.engine();
    until(event, || {
        engine
            .listening()
            .iter()
            .any(|(_, events)| events.iter().any(|name| name == event))
    })
    .await;
    let payload: BTreeMap<String, String> = fields
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    assert!(engine.emit(event, payload), "{} was not delivered", event);
}

#[tokio::test]
async fn new_account_enables_access_and_ends_on_welcome() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let script = vec![
        scripted("did-submit-email", &[("email", "newcomer@kite.io")]),
        scripted("did-whitelist", &[]),
    ];

    let result = drive(&config, &script, Duration::from_secs(10)).await.unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.state.lookup("account.created"), Some(&json!(true)));
    assert_eq!(result.state.lookup("account.exists"), Some(&json!(false)));
    assert_eq!(result.state.lookup("whitelist.done"), Some(&json!(true)));
    assert_eq!(result.state.lookup("download.done"), Some(&json!(true)));
    assert_eq!(result.state.lookup("running.done"), Some(&json!(true)));
    assert!(result
        .transitions
        .contains(&"install/account-switch/create-account".to_string()));
    assert_eq!(
        result.transitions.last().map(String::as_str),
        Some("install/termination/end")
    );
}

#[tokio::test]
async fn invalid_email_stays_on_the_form() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&test_config(dir.path()));
    session.start_now();

    emit(&session, "did-submit-email", &[("email", "not-an-email")]).await;
    let engine = session.engine();
    until("error shown", || engine.state().has_error()).await;
    assert_eq!(engine.current_step().as_deref(), Some("input-email"));
    let page = session.render_page();
    assert!(page.contains("Please enter a valid email address"));
    assert!(page.contains(r#"value="not-an-email""#));

    emit(&session, "did-submit-email", &[("email", "dev@kite.io")]).await;
    until("login", || engine.current_step().as_deref() == Some("login")).await;
    assert!(!engine.state().has_error());
    assert!(session.render_page().contains("Sign in"));
    session.shutdown();
}

#[tokio::test]
async fn bad_password_retries_and_back_returns_to_email() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&test_config(dir.path()));
    session.start_now();
    let engine = session.engine();

    emit(&session, "did-submit-email", &[("email", "dev@kite.io")]).await;
    emit(
        &session,
        "did-submit-credentials",
        &[("email", "dev@kite.io"), ("password", "wrong")],
    )
    .await;
    until("login error", || {
        engine.state().error_message() == Some("Invalid email or password")
    })
    .await;
    until("login again", || !engine.listening().is_empty()).await;
    assert_eq!(engine.current_step().as_deref(), Some("login"));
    assert!(session.render_page().contains("Invalid email or password"));

    emit(&session, "did-forgot-password", &[]).await;
    until("reset sent", || {
        engine.state().lookup("account.reset_sent") == Some(&json!(true))
    })
    .await;

    emit(&session, "did-click-back", &[]).await;
    until("email form", || {
        engine.current_step().as_deref() == Some("input-email")
    })
    .await;
    assert!(!engine.state().has_error());
    let change_path: Vec<String> = engine
        .last_step_change()
        .map(|change| change.path)
        .unwrap_or_default();
    assert_eq!(change_path, vec!["install", "input-email"]);
    session.shutdown();
}

#[tokio::test]
async fn whitelist_failure_ends_on_the_error_view() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let session = session(&test_config(&missing));
    session.start_now();
    let engine = session.engine();

    emit(&session, "did-submit-email", &[("email", "dev@kite.io")]).await;
    emit(
        &session,
        "did-submit-credentials",
        &[("email", "dev@kite.io"), ("password", "hunter2")],
    )
    .await;
    emit(&session, "did-whitelist", &[]).await;

    let result = timeout(Duration::from_secs(5), session.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.status, FlowStatus::Completed);
    assert_eq!(
        result.transitions.last().map(String::as_str),
        Some("install/termination/error")
    );
    assert_eq!(engine.current_step().as_deref(), Some("error"));
    assert!(session.render_page().contains("Unable to enable access for"));
    assert_eq!(engine.progress(), 1.0);
}

#[tokio::test]
async fn whitelist_choice_is_shown_while_downloading() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.installer.download_chunks = 20;
    config.installer.chunk_delay_ms = 20;
    let session = session(&config);
    session.start_now();
    let engine = session.engine();

    emit(&session, "did-submit-email", &[("email", "newcomer@kite.io")]).await;
    until("download progress", || engine.progress() > 0.0).await;

    assert_eq!(
        engine.current_step().as_deref(),
        Some("download-and-whitelist")
    );
    let page = session.render_page();
    assert!(page.contains("Enable access for"));
    assert!(page.contains(r#"<div class="download">"#));

    emit(&session, "did-skip-whitelist", &[]).await;
    let result = timeout(Duration::from_secs(5), session.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.state.lookup("whitelist.choice"), Some(&json!(false)));
    assert_eq!(result.state.lookup("whitelist.done"), None);
}
