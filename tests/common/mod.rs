use std::collections::HashMap;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    #[allow(dead_code)]
    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    #[allow(dead_code)]
    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Batches received by [`spawn_chatbase`]: query string and JSON body.
#[allow(dead_code)]
pub type Received = std::sync::Arc<std::sync::Mutex<Vec<(HashMap<String, String>, serde_json::Value)>>>;

/// Minimal Chatbase stand-in answering `POST /api/messages` with `status`.
#[allow(dead_code)]
pub async fn spawn_chatbase(status: u16) -> (String, Received) {
    use axum::{extract::Query, extract::State, http::StatusCode, routing::post, Json, Router};

    let received: Received = Default::default();
    let app = Router::new()
        .route(
            "/api/messages",
            post(
                |State((rx, status)): State<(Received, u16)>,
                 Query(q): Query<HashMap<String, String>>,
                 Json(body): Json<serde_json::Value>| async move {
                    rx.lock().unwrap().push((q, body));
                    (StatusCode::from_u16(status).unwrap(), "{\"status\":200}")
                },
            ),
        )
        .with_state((received.clone(), status));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), received)
}

/// Poll until `received` holds `n` batches or a second passes.
#[allow(dead_code)]
pub async fn wait_for(received: &Received, n: usize) -> bool {
    for _ in 0..100 {
        if received.lock().unwrap().len() >= n {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

/// Schema-complete Dialogflow request relayed from Telegram.
#[allow(dead_code)]
pub fn telegram_webhook(text: &str, action: &str) -> serde_json::Value {
    serde_json::json!({
        "responseId": "5b7c1a2e-0001",
        "session": "projects/oilfield-bot/agent/sessions/tg-1001",
        "queryResult": {
            "queryText": text,
            "action": action,
            "parameters": {},
            "allRequiredParamsPresent": true,
            "fulfillmentText": "Добыча за сутки: 120.5 т",
            "fulfillmentMessages": [{"text": {"text": ["Добыча за сутки: 120.5 т"]}}],
            "outputContexts": [],
            "intent": {
                "name": "projects/oilfield-bot/agent/intents/7f1",
                "displayName": "mining.daily"
            },
            "intentDetectionConfidence": 0.92,
            "languageCode": "ru"
        },
        "originalDetectIntentRequest": {
            "source": "telegram",
            "payload": {"data": {
                "message_id": 412,
                "date": 1546300800,
                "from": {"id": 1001, "first_name": "Ivan", "language_code": "ru"},
                "chat": {"id": 1001, "type": "private"},
                "text": text
            }}
        }
    })
}

/// Schema-complete Dialogflow request bridged from Yandex Alice.
#[allow(dead_code)]
pub fn alice_webhook(command: &str) -> serde_json::Value {
    serde_json::json!({
        "responseId": "5b7c1a2e-0002",
        "session": "projects/oilfield-bot/agent/sessions/al-2002",
        "queryResult": {
            "queryText": command,
            "action": "incidents.list",
            "fulfillmentText": "Инцидентов за период нет",
            "fulfillmentMessages": [],
            "outputContexts": [],
            "intent": {
                "name": "projects/oilfield-bot/agent/intents/9a2",
                "displayName": "incidents.list"
            },
            "languageCode": "ru"
        },
        "originalDetectIntentRequest": {
            "payload": {
                "meta": {
                    "locale": "ru-RU",
                    "timezone": "Europe/Moscow",
                    "client_id": "ru.yandex.searchplugin/7.16 (none none; android 4.4.2)",
                    "interfaces": {"screen": {}}
                },
                "session": {
                    "session_id": "2eac4854-fce721f3-b845abba-20d60",
                    "message_id": 4,
                    "skill_id": "3ad36498-f5rd-4079-a14b-788652932056",
                    "user_id": "AC9WC3DF6FCE052E45A4566A48E6B7193774B84814CE49A922E163B8B29881DC",
                    "application": {"application_id": "AC9WC3DF6FCE052E45A4566A48E6B7193774B84814CE49A922E163B8B29881DC"},
                    "new": false
                },
                "request": {
                    "command": command,
                    "original_utterance": command,
                    "type": "SimpleUtterance",
                    "nlu": {"tokens": [], "entities": []}
                },
                "version": "1.0"
            }
        }
    })
}
