#[path = "common/mod.rs"]
mod common;

use common::{telegram_webhook, EnvGuard};
use fieldrelay::{app, build_state_from_env};
use once_cell::sync::Lazy;
use std::fs;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

static TEST_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

async fn start_server() -> (u16, tokio::sync::oneshot::Sender<()>) {
    let state = build_state_from_env().await.expect("state");
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await
            .ok();
    });
    (port, tx)
}

async fn post_webhook(port: u16, body: &serde_json::Value) -> u16 {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/info/webhook", port))
        .json(body)
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

#[tokio::test]
async fn webhook_requests_are_logged_as_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.ndjson");

    let _lock = TEST_GUARD.lock().await;
    let mut env = EnvGuard::new();
    env.remove("CHATBASE_API_KEY");
    env.remove("LOG_MAX_BYTES");
    env.set("LOG_FILE", path.to_str().unwrap());

    let (port, shutdown) = start_server().await;
    assert_eq!(post_webhook(port, &telegram_webhook("скважины", "wells.list")).await, 200);
    assert_eq!(post_webhook(port, &serde_json::json!({"session": "s"})).await, 200);
    let _ = shutdown.send(());

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["platform"], "telegram");
    assert_eq!(lines[0]["intent"], "mining.daily");
    assert_eq!(lines[0]["session"], "projects/oilfield-bot/agent/sessions/tg-1001");
    assert_eq!(lines[0]["forward"], "disabled");
    assert_eq!(lines[0]["schemaViolations"], 0);
    assert_eq!(lines[1]["platform"], "unknown");
    assert!(lines[1]["intent"].is_null());
    assert!(lines[1]["schemaViolations"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn event_log_rotates_under_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.ndjson");

    let _lock = TEST_GUARD.lock().await;
    let mut env = EnvGuard::new();
    env.remove("CHATBASE_API_KEY");
    env.set_many(&[
        ("LOG_FILE", path.to_str().unwrap()),
        ("LOG_MAX_BYTES", "200"),
        ("LOG_ROTATE_KEEP", "2"),
        ("LOG_ROTATE_COMPRESS", "true"),
    ]);

    let (port, shutdown) = start_server().await;
    for _ in 0..6u8 {
        post_webhook(port, &telegram_webhook("скважины", "wells.list")).await;
    }
    let _ = shutdown.send(());

    assert!(dir.path().join("events.ndjson.1.gz").exists());
    assert!(dir.path().join("events.ndjson.2.gz").exists());
    assert!(!dir.path().join("events.ndjson.3.gz").exists());
    assert!(fs::metadata(&path).unwrap().len() > 0);
}
