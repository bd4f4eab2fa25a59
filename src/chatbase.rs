//! Chatbase analytics messages and the HTTP client that delivers them.

use std::time::Duration;

use serde::Serialize;

use crate::error::ForwardError;

pub const DEFAULT_BASE_URL: &str = "https://chatbase.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Agent,
}

/// One analytics message in the shape the Chatbase API accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub api_key: String,
    pub platform: String,
    pub message: String,
    pub intent: String,
    pub version: String,
    pub user_id: String,
    pub session_id: String,
    pub not_handled: bool,
    pub feedback: bool,
    /// Milliseconds since the Unix epoch.
    pub time_stamp: i64,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
}

impl Message {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            api_key: String::new(),
            platform: String::new(),
            message: String::new(),
            intent: String::new(),
            version: String::new(),
            user_id: String::new(),
            session_id: String::new(),
            not_handled: false,
            feedback: false,
            time_stamp: chrono::Utc::now().timestamp_millis(),
            msg_type,
        }
    }

    /// Message typed by the end user.
    pub fn user() -> Self {
        Self::new(MessageType::User)
    }

    /// Message produced by the bot.
    pub fn agent() -> Self {
        Self::new(MessageType::Agent)
    }

    pub fn set_as_type_user(&mut self) {
        self.msg_type = MessageType::User;
    }

    pub fn set_as_type_agent(&mut self) {
        self.msg_type = MessageType::Agent;
    }

    /// Only user messages may be flagged as not handled.
    pub fn set_as_not_handled(&mut self) -> Result<(), ForwardError> {
        if self.msg_type == MessageType::Agent {
            return Err(ForwardError::InvalidMessageType("not_handled"));
        }
        self.not_handled = true;
        Ok(())
    }

    pub fn set_as_handled(&mut self) {
        self.not_handled = false;
    }

    /// Only user messages may be flagged as feedback.
    pub fn set_as_feedback(&mut self) -> Result<(), ForwardError> {
        if self.msg_type == MessageType::Agent {
            return Err(ForwardError::InvalidMessageType("feedback"));
        }
        self.feedback = true;
        Ok(())
    }

    pub fn set_as_not_feedback(&mut self) {
        self.feedback = false;
    }
}

/// Batch of messages sharing api key, platform, version and user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSet {
    #[serde(skip)]
    pub api_key: String,
    #[serde(skip)]
    pub platform: String,
    #[serde(skip)]
    pub version: String,
    #[serde(skip)]
    pub user_id: String,
    pub messages: Vec<Message>,
}

impl MessageSet {
    pub fn new(
        api_key: impl Into<String>,
        platform: impl Into<String>,
        version: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            platform: platform.into(),
            version: version.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
        }
    }

    /// Append a message inheriting the set's shared fields and return it.
    pub fn new_message(
        &mut self,
        intent: &str,
        message: &str,
        session_id: &str,
        msg_type: MessageType,
        not_handled: bool,
    ) -> &mut Message {
        let mut msg = Message::new(msg_type);
        msg.api_key = self.api_key.clone();
        msg.platform = self.platform.clone();
        msg.version = self.version.clone();
        msg.user_id = self.user_id.clone();
        msg.intent = intent.to_string();
        msg.message = message.to_string();
        msg.session_id = session_id.to_string();
        msg.not_handled = not_handled;
        self.messages.push(msg);
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Destination for analytics batches.  The Chatbase client is the production
/// implementation; tests plug in recording sinks.
#[async_trait::async_trait]
pub trait AnalyticsSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send_batch(&self, set: &MessageSet) -> Result<(), ForwardError>;
}

/// Thin reqwest wrapper around the Chatbase message endpoints.
#[derive(Clone, Debug)]
pub struct ChatbaseClient {
    base_url: String,
    client: reqwest::Client,
}

impl ChatbaseClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a single message to `/api/message`.
    pub async fn send_message(&self, msg: &Message) -> Result<(), ForwardError> {
        let url = format!("{}/api/message", self.base_url);
        let body = serde_json::to_vec(msg).unwrap_or_default();
        self.post(&url, body).await
    }

    /// POST a batch to `/api/messages?api_key=...`.
    pub async fn send_set(&self, set: &MessageSet) -> Result<(), ForwardError> {
        let url = format!("{}/api/messages", self.base_url);
        let url = reqwest::Url::parse_with_params(&url, &[("api_key", set.api_key.as_str())])
            .map(String::from)
            .unwrap_or(url);
        let body = serde_json::to_vec(set).unwrap_or_default();
        self.post(&url, body).await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), ForwardError> {
        let resp = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("accept", "text/plain")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ForwardError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl AnalyticsSink for ChatbaseClient {
    fn name(&self) -> &str {
        "chatbase"
    }

    async fn send_batch(&self, set: &MessageSet) -> Result<(), ForwardError> {
        self.send_set(set).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[test]
    fn agent_messages_reject_user_only_flags() {
        let mut msg = Message::agent();
        assert!(matches!(
            msg.set_as_not_handled(),
            Err(ForwardError::InvalidMessageType("not_handled"))
        ));
        assert!(matches!(
            msg.set_as_feedback(),
            Err(ForwardError::InvalidMessageType("feedback"))
        ));
        msg.set_as_type_user();
        msg.set_as_not_handled().unwrap();
        msg.set_as_feedback().unwrap();
        assert!(msg.not_handled && msg.feedback);
        msg.set_as_handled();
        msg.set_as_not_feedback();
        assert!(!msg.not_handled && !msg.feedback);
    }

    #[test]
    fn message_serializes_with_wire_names() {
        let mut set = MessageSet::new("key", "telegram", "0.1", "42-ru.telegram_client");
        set.new_message("wells", "сколько скважин", "s-1", MessageType::User, true);
        let v = serde_json::to_value(&set).unwrap();
        let msg = &v["messages"][0];
        assert_eq!(msg["type"], "user");
        assert_eq!(msg["api_key"], "key");
        assert_eq!(msg["platform"], "telegram");
        assert_eq!(msg["user_id"], "42-ru.telegram_client");
        assert_eq!(msg["not_handled"], json!(true));
        assert_eq!(msg["feedback"], json!(false));
        assert!(msg["time_stamp"].as_i64().unwrap() > 0);
        assert!(v.get("api_key").is_none());
    }

    #[tokio::test]
    async fn send_set_posts_batch_with_api_key_query() {
        type Seen = Arc<Mutex<Vec<(String, Value)>>>;
        let seen: Seen = Arc::default();
        let captured = seen.clone();
        let app = Router::new().route(
            "/api/messages",
            post(
                move |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| {
                    let captured = captured.clone();
                    async move {
                        let key = q.get("api_key").cloned().unwrap_or_default();
                        captured.lock().unwrap().push((key, body));
                        "ok"
                    }
                },
            ),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            ChatbaseClient::new(&format!("http://{}/", addr), Duration::from_secs(2)).unwrap();
        let mut set = MessageSet::new("k-1", "alice", "0.1", "u");
        set.new_message("i", "привет", "s", MessageType::User, false);
        set.new_message("i", "здравствуйте", "s", MessageType::Agent, false);
        client.send_batch(&set).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "k-1");
        assert_eq!(seen[0].1["messages"].as_array().unwrap().len(), 2);
        assert_eq!(seen[0].1["messages"][1]["type"], "agent");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let app = Router::new().route(
            "/api/message",
            post(|| async { (axum::http::StatusCode::BAD_REQUEST, "bad api key") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let client =
            ChatbaseClient::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = client.send_message(&Message::user()).await.unwrap_err();
        match err {
            ForwardError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad api key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
