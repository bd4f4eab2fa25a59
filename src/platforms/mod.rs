//! Platform adapters and detection.
//!
//! Dialogflow forwards the originating platform's request in
//! `originalDetectIntentRequest`.  Telegram sets `source`; Alice requests
//! proxied through a Dialogflow bridge leave it empty and are recognised by
//! the shape of the payload instead.

use std::fmt;

use serde_json::Value;

use crate::schema::dialogflow::WebhookRequest;

pub mod alice;
pub mod dialogflow;
pub mod telegram;

pub use dialogflow::WebhookHandler;

pub const ALICE_SOURCE: &str = "alice";
pub const TELEGRAM_SOURCE: &str = "telegram";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Alice,
    Telegram,
    /// Any other non-empty `source` Dialogflow reports (google, facebook...).
    Other(String),
    Unknown,
}

impl Platform {
    pub fn detect(handler: &WebhookHandler) -> Self {
        match handler.source() {
            TELEGRAM_SOURCE => Platform::Telegram,
            ALICE_SOURCE => Platform::Alice,
            "" if is_alice(handler) => Platform::Alice,
            "" => Platform::Unknown,
            other => Platform::Other(other.to_string()),
        }
    }

    /// Label used in analytics and metrics.
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Alice => ALICE_SOURCE,
            Platform::Telegram => TELEGRAM_SOURCE,
            Platform::Other(s) => s,
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when the request carries no `source` and its payload looks like an
/// Alice request (`meta.client_id` present).
pub fn is_alice(handler: &WebhookHandler) -> bool {
    handler.source().is_empty() && has_alice_meta(handler.payload())
}

fn has_alice_meta(payload: &Value) -> bool {
    payload
        .get("meta")
        .and_then(|m| m.get("client_id"))
        .is_some()
}

/// Client label for a typed request: the reported source, or `alice`.
pub fn detect_client(req: &WebhookRequest) -> &str {
    match req.original_detect_intent_request.source.as_deref() {
        Some(source) if !source.is_empty() => source,
        _ => ALICE_SOURCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler(odir: Value) -> WebhookHandler {
        WebhookHandler::new(json!({"session": "s", "originalDetectIntentRequest": odir}))
    }

    #[test]
    fn detects_platform_from_source_and_payload() {
        assert_eq!(
            Platform::detect(&handler(json!({"source": "telegram", "payload": {}}))),
            Platform::Telegram
        );
        assert_eq!(
            Platform::detect(&handler(json!({"payload": {"meta": {"client_id": "x"}}}))),
            Platform::Alice
        );
        assert_eq!(
            Platform::detect(&handler(json!({"source": "google"}))),
            Platform::Other("google".into())
        );
        assert_eq!(Platform::detect(&handler(json!({}))), Platform::Unknown);
    }

    #[test]
    fn alice_meta_ignored_when_source_is_set() {
        let h = handler(json!({"source": "telegram", "payload": {"meta": {"client_id": "x"}}}));
        assert!(!is_alice(&h));
    }

    #[test]
    fn detect_client_defaults_to_alice() {
        let mut raw = json!({
            "responseId": "r",
            "session": "projects/p/agent/sessions/s",
            "originalDetectIntentRequest": {"payload": {}},
            "queryResult": {
                "queryText": "q",
                "fulfillmentText": "a",
                "fulfillmentMessages": [],
                "outputContexts": [],
                "intent": {"name": "n", "displayName": "d"},
                "languageCode": "ru"
            }
        });
        let req: WebhookRequest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(detect_client(&req), "alice");

        raw["originalDetectIntentRequest"]["source"] = json!("telegram");
        let req: WebhookRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(detect_client(&req), "telegram");
    }
}
