//! Yandex Alice request accessors and response builder.

use serde_json::{json, Map, Value};

use crate::error::AdapterError;
use crate::schema::alice::MAX_TEXT_CHARS;

/// Placeholder user id Alice sessions carry when the user is not logged in.
pub const ANONYMOUS_USER_ID: &str = "00000000000";

/// Length of the application id prefix used in analytics user ids.
const APP_ID_PREFIX: usize = 9;

#[derive(Debug, Clone, Copy)]
pub struct AliceRequest<'a> {
    raw: &'a Value,
}

impl<'a> AliceRequest<'a> {
    pub fn new(raw: &'a Value) -> Self {
        Self { raw }
    }

    /// Analytics user id: first nine characters of the application id, a
    /// dash, then the client id.
    pub fn uid(&self) -> Result<String, AdapterError> {
        let app: String = self.application_id()?.chars().take(APP_ID_PREFIX).collect();
        Ok(format!("{}-{}", app, self.client_id()?))
    }

    pub fn client_id(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/meta/client_id", "meta.client_id")
    }

    pub fn locale(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/meta/locale", "meta.locale")
    }

    pub fn timezone(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/meta/timezone", "meta.timezone")
    }

    /// Surface interfaces; older protocol versions put them at the root.
    pub fn interfaces(&self) -> Result<&'a Value, AdapterError> {
        self.raw
            .pointer("/meta/interfaces")
            .or_else(|| self.raw.get("interfaces"))
            .ok_or(AdapterError::Malformed("interfaces"))
    }

    pub fn version(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/version", "version")
    }

    pub fn session(&self) -> Result<&'a Value, AdapterError> {
        self.raw
            .get("session")
            .filter(|s| s.is_object())
            .ok_or(AdapterError::Malformed("session"))
    }

    pub fn application_id(&self) -> Result<&'a str, AdapterError> {
        self.str_at(
            "/session/application/application_id",
            "session.application.application_id",
        )
    }

    pub fn session_id(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/session/session_id", "session.session_id")
    }

    pub fn user_id(&self) -> Result<&'a str, AdapterError> {
        let session = self.session()?;
        match session.get("user") {
            Some(user) => user
                .get("user_id")
                .and_then(Value::as_str)
                .ok_or(AdapterError::Malformed("session.user.user_id")),
            None => Ok(ANONYMOUS_USER_ID),
        }
    }

    pub fn is_new_session(&self) -> Result<bool, AdapterError> {
        self.raw
            .pointer("/session/new")
            .and_then(Value::as_bool)
            .ok_or(AdapterError::Malformed("session.new"))
    }

    pub fn command(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/request/command", "request.command")
    }

    fn str_at(&self, pointer: &str, field: &'static str) -> Result<&'a str, AdapterError> {
        self.raw
            .pointer(pointer)
            .and_then(Value::as_str)
            .ok_or(AdapterError::Malformed(field))
    }
}

/// Answer to an Alice request.  Echoes `version` and `session` from the
/// request and starts with `end_session: false`.
#[derive(Debug, Clone)]
pub struct AliceResponse {
    version: String,
    session: Value,
    response: Map<String, Value>,
}

impl AliceResponse {
    pub fn new(request: &AliceRequest<'_>) -> Result<Self, AdapterError> {
        let mut response = Map::new();
        response.insert("end_session".into(), json!(false));
        Ok(Self {
            version: request.version()?.to_string(),
            session: request.session()?.clone(),
            response,
        })
    }

    /// Set the reply text, truncated to the platform limit.
    pub fn set_text(&mut self, text: &str) -> &mut Self {
        let text: String = text.chars().take(MAX_TEXT_CHARS).collect();
        self.response.insert("text".into(), Value::String(text));
        self
    }

    pub fn set_buttons(&mut self, buttons: Vec<Value>) -> &mut Self {
        self.response.insert("buttons".into(), Value::Array(buttons));
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.response.insert("end_session".into(), json!(true));
        self
    }

    pub fn to_value(&self) -> Value {
        json!({
            "version": self.version,
            "session": self.session,
            "response": self.response,
        })
    }

    /// Pretty-printed JSON with non-ASCII text kept as is.
    pub fn dumps(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}

impl std::fmt::Display for AliceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dumps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::alice::AliceResponse as AliceResponseDoc;
    use crate::schema::Validate;

    fn request() -> Value {
        json!({
            "meta": {
                "locale": "ru-RU",
                "timezone": "Asia/Yekaterinburg",
                "client_id": "ru.yandex.searchplugin/7.16",
                "interfaces": {"screen": {}}
            },
            "session": {
                "session_id": "2eac4854-fce721f3",
                "message_id": 4,
                "skill_id": "3ad36498-f5rd",
                "user_id": "AC9WC3DF6FCE052E45A4566A48E6B7193774B84814CE49A922E163B8B29881DC",
                "application": {"application_id": "47C73714B580ED2469056E71081159529FFC676A4E5B059D629A819E857DC2F8"},
                "new": true
            },
            "request": {
                "command": "сколько скважин в работе",
                "original_utterance": "сколько скважин в работе",
                "type": "SimpleUtterance",
                "nlu": {"tokens": [], "entities": []}
            },
            "version": "1.0"
        })
    }

    #[test]
    fn reads_request_fields() {
        let raw = request();
        let r = AliceRequest::new(&raw);
        assert_eq!(r.uid().unwrap(), "47C73714B-ru.yandex.searchplugin/7.16");
        assert_eq!(r.user_id().unwrap(), ANONYMOUS_USER_ID);
        assert_eq!(r.command().unwrap(), "сколько скважин в работе");
        assert_eq!(r.locale().unwrap(), "ru-RU");
        assert_eq!(r.timezone().unwrap(), "Asia/Yekaterinburg");
        assert_eq!(r.session_id().unwrap(), "2eac4854-fce721f3");
        assert!(r.is_new_session().unwrap());
        assert!(r.interfaces().unwrap().get("screen").is_some());
    }

    #[test]
    fn short_application_id_is_used_whole() {
        let raw = json!({
            "meta": {"client_id": "c"},
            "session": {"application": {"application_id": "абв"}, "user": {"user_id": "u1"}}
        });
        let r = AliceRequest::new(&raw);
        assert_eq!(r.uid().unwrap(), "абв-c");
        assert_eq!(r.user_id().unwrap(), "u1");
    }

    #[test]
    fn response_echoes_session_and_truncates_text() {
        let raw = request();
        let req = AliceRequest::new(&raw);
        let mut resp = AliceResponse::new(&req).unwrap();
        resp.set_text(&"ы".repeat(MAX_TEXT_CHARS + 10))
            .set_buttons(vec![json!({"title": "Добыча", "hide": true})])
            .end();
        let value = resp.to_value();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["session"]["session_id"], "2eac4854-fce721f3");
        assert_eq!(value["response"]["end_session"], json!(true));
        assert_eq!(
            value["response"]["text"].as_str().unwrap().chars().count(),
            MAX_TEXT_CHARS
        );
        assert!(resp.dumps().contains("Добыча"));

        let doc: AliceResponseDoc = serde_json::from_value(value).unwrap();
        assert!(doc.validate().is_ok());
    }
}
