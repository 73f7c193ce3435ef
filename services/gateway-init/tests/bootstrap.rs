//! Integration tests for the bootstrap sequence.
//!
//! These tests run the whole coordinator against a temp directory layout:
//! 1. Concurrent callers racing for the lock
//! 2. Restore, onboarding and patching across repeated boots
//! 3. The full restore-from-backup scenario
//!
//! Uses MockGateway, which binds the gateway port on launch.

use std::path::Path;
use std::sync::Arc;

use claw_config_patch::env::{AiGatewayEnv, TelegramEnv};
use claw_config_patch::{GatewayEnv, DEFAULT_GATEWAY_PORT};
use claw_gateway_init::config::BootstrapConfig;
use claw_gateway_init::gateway::MockGateway;
use claw_gateway_init::lock::{self, LockInfo, LockState};
use claw_gateway_init::marker::SyncMarker;
use claw_gateway_init::{BootstrapError, Coordinator, Outcome};
use serde_json::{json, Value};
use tempfile::TempDir;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn layout(port: u16) -> (TempDir, BootstrapConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = BootstrapConfig::rooted(dir.path(), port);
    (dir, config)
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// Run `n` coordinators sharing one gateway at once.
async fn race(config: &BootstrapConfig, gateway: &Arc<MockGateway>, n: usize) -> Vec<Result<Outcome, BootstrapError>> {
    let mut handles = Vec::new();
    for _ in 0..n {
        let coordinator = Coordinator::new(config.clone(), GatewayEnv::default(), gateway.clone());
        handles.push(tokio::spawn(async move { coordinator.ensure_running().await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

fn started(results: &[Result<Outcome, BootstrapError>]) -> usize {
    results
        .iter()
        .filter(|r| matches!(r, Ok(Outcome::Started { .. })))
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_launch_at_most_once() {
    let (_dir, config) = layout(free_port());
    write(&config.config_file(), "{}");
    let gateway = Arc::new(MockGateway::new());

    let results = race(&config, &gateway, 8).await;

    assert_eq!(started(&results), 1);
    assert_eq!(gateway.launch_attempts(), 1);
    for result in &results {
        match result {
            Ok(_) => {}
            Err(e) => assert!(e.is_lock_contention(), "unexpected error: {}", e),
        }
    }
    assert_eq!(lock::read_state(&config.lock_path), LockState::Free);

    // Everyone after the race sees the running gateway.
    let late = Coordinator::new(config.clone(), GatewayEnv::default(), gateway.clone());
    assert_eq!(late.ensure_running().await.unwrap(), Outcome::AlreadyRunning);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_lock_recovered_by_exactly_one_caller() {
    let (_dir, config) = layout(free_port());
    write(&config.config_file(), "{}");
    let stale = LockInfo {
        pid: dead_pid(),
        acquired_at: chrono::Utc::now(),
    };
    write(&config.lock_path, &serde_json::to_string(&stale).unwrap());
    assert_eq!(lock::read_state(&config.lock_path), LockState::Abandoned(Some(stale)));

    let gateway = Arc::new(MockGateway::new());
    let results = race(&config, &gateway, 2).await;

    assert_eq!(started(&results), 1);
    assert_eq!(gateway.launch_attempts(), 1);
    assert_eq!(lock::read_state(&config.lock_path), LockState::Free);
}

#[tokio::test]
async fn test_onboarding_never_runs_for_empty_document() {
    let (_dir, config) = layout(free_port());
    write(&config.config_file(), "{}");
    let gateway = Arc::new(MockGateway::new());
    let coordinator = Coordinator::new(config.clone(), GatewayEnv::default(), gateway.clone());

    coordinator.ensure_running().await.unwrap();
    gateway.kill();
    coordinator.ensure_running().await.unwrap();

    assert!(gateway.onboards().is_empty());
    assert_eq!(gateway.launch_attempts(), 2);
}

#[tokio::test]
async fn test_onboarding_runs_once_on_first_boot() {
    let (_dir, config) = layout(free_port());
    let gateway = Arc::new(
        MockGateway::new().with_onboard_output(config.config_file(), json!({ "agents": {} })),
    );
    let coordinator = Coordinator::new(config.clone(), GatewayEnv::default(), gateway.clone());

    coordinator.ensure_running().await.unwrap();
    gateway.kill();
    coordinator.ensure_running().await.unwrap();

    assert_eq!(gateway.onboards().len(), 1);
}

#[tokio::test]
async fn test_onboarding_prefers_ai_gateway_credentials() {
    let (_dir, config) = layout(free_port());
    let gateway = Arc::new(MockGateway::new());
    let env = GatewayEnv {
        anthropic_api_key: Some("sk-ant".to_string()),
        openai_api_key: Some("sk-oai".to_string()),
        ai_gateway: AiGatewayEnv {
            api_key: Some("cf-key".to_string()),
            account_id: Some("acct".to_string()),
            gateway_id: Some("gw".to_string()),
            model: None,
        },
        ..Default::default()
    };
    let coordinator = Coordinator::new(config.clone(), env, gateway.clone());

    coordinator.ensure_running().await.unwrap();

    let onboards = gateway.onboards();
    assert_eq!(onboards.len(), 1);
    assert_eq!(onboards[0].auth.label(), "ai-gateway");
    let args = onboards[0].args();
    assert!(args.contains(&"--cloudflare-ai-gateway-api-key".to_string()));
    assert!(!args.contains(&"--anthropic-api-key".to_string()));
}

#[tokio::test]
async fn test_repeated_boots_are_idempotent() {
    let (_dir, config) = layout(free_port());
    write(
        &config.config_file(),
        r#"{"channels":{"telegram":{"botToken":"old","legacyPollingMode":true,"groups":{"-100":{}}}}}"#,
    );
    let env = GatewayEnv {
        gateway_token: Some("tok".to_string()),
        telegram: TelegramEnv {
            bot_token: Some("new".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let gateway = Arc::new(MockGateway::new());
    let coordinator = Coordinator::new(config.clone(), env, gateway.clone());

    coordinator.ensure_running().await.unwrap();
    let first = read_json(&config.config_file());
    gateway.kill();
    coordinator.ensure_running().await.unwrap();
    let second = read_json(&config.config_file());

    assert_eq!(first, second);
    let telegram = &second["channels"]["telegram"];
    assert!(telegram.get("legacyPollingMode").is_none());
    assert_eq!(telegram["botToken"], json!("new"));
    assert_eq!(telegram["groups"], json!({ "-100": {} }));
}

#[tokio::test]
async fn test_end_to_end_restore_patch_launch() {
    // The scenario uses the default port when it is free on this host.
    let port = std::net::TcpListener::bind(("127.0.0.1", DEFAULT_GATEWAY_PORT))
        .map(|_| DEFAULT_GATEWAY_PORT)
        .unwrap_or_else(|_| free_port());
    let (_dir, config) = layout(port);

    write(&config.backup_marker(), "2024-01-01T00:00:00Z\n");
    write(
        &config.backup_config_dir().join("openclaw.json"),
        r#"{"agents":{"defaults":{"workspace":"/root/clawd"}}}"#,
    );
    write(&config.backup_workspace_dir().join("IDENTITY.md"), "restored");

    let env = GatewayEnv {
        gateway_token: Some("T".to_string()),
        ..Default::default()
    };
    let gateway = Arc::new(MockGateway::new());
    let coordinator = Coordinator::new(config.clone(), env, gateway.clone());

    let outcome = coordinator.ensure_running().await.unwrap();
    assert!(matches!(outcome, Outcome::Started { .. }));

    // Restored, so never onboarded.
    assert!(gateway.onboards().is_empty());
    assert_eq!(
        std::fs::read_to_string(config.workspace_dir.join("IDENTITY.md")).unwrap(),
        "restored"
    );
    assert_eq!(
        SyncMarker::read(&config.local_marker()).await,
        SyncMarker::parse("2024-01-01T00:00:00Z")
    );

    let doc = read_json(&config.config_file());
    assert_eq!(doc["agents"]["defaults"]["workspace"], json!("/root/clawd"));
    assert_eq!(doc["gateway"]["port"], json!(port));
    assert_eq!(doc["gateway"]["auth"]["token"], json!("T"));

    let launches = gateway.launches();
    assert_eq!(launches.len(), 1);
    let args = launches[0].args();
    let token_at = args.iter().position(|a| a == "--token").unwrap();
    assert_eq!(args[token_at + 1], "T");
    assert!(args.contains(&port.to_string()));
    assert_eq!(lock::read_state(&config.lock_path), LockState::Free);
}
