//! Yandex Dialogs (Alice) skill protocol: the request Yandex posts to the
//! skill webhook and the response the skill must answer within 3 seconds.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{absolute_url_opt, each, max_chars, max_chars_opt, nested, Validate};
use crate::error::ValidationErrors;

/// Hard limit on `response.text`, `response.tts` and `original_utterance`.
pub const MAX_TEXT_CHARS: usize = 1024;
/// Hard limit on button payloads, measured on the serialized JSON.
pub const MAX_PAYLOAD_BYTES: usize = 4096;
const MAX_EVENT_DEPTH: usize = 5;

static SPEAKER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<speaker [^>]*>").expect("speaker tag regex"));

/// Device capabilities announced by the client.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Interfaces {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_linking: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payments: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Meta {
    pub locale: String,
    pub timezone: String,
    pub client_id: String,
    pub interfaces: Interfaces,
}

impl Validate for Meta {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars(errs, "locale", &self.locale, 64);
        max_chars(errs, "timezone", &self.timezone, 64);
        max_chars(errs, "client_id", &self.client_id, 1024);
    }
}

/// Authorized Yandex user; absent for anonymous sessions.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Application {
    pub application_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub message_id: u64,
    pub skill_id: String,
    /// Deprecated upstream in favour of `application.application_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub application: Application,
    pub new: bool,
}

impl Validate for Session {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars(errs, "session_id", &self.session_id, 64);
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Markup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dangerous_context: Option<bool>,
}

/// Word span of a named entity; `end` is exclusive.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Tokens {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NamedEntity {
    pub tokens: Tokens,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: Value,
}

impl Validate for NamedEntity {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.tokens.end < self.tokens.start {
            errs.push("tokens.end", "must not precede tokens.start");
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Nlu {
    pub tokens: Vec<String>,
    pub entities: Vec<NamedEntity>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RequestType {
    SimpleUtterance,
    ButtonPressed,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_utterance: Option<String>,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<Markup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub nlu: Nlu,
}

impl Validate for Request {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars_opt(
            errs,
            "original_utterance",
            self.original_utterance.as_deref(),
            MAX_TEXT_CHARS,
        );
        payload_size(errs, "payload", self.payload.as_ref());
        each(errs, "nlu.entities", &self.nlu.entities);
    }
}

/// Request body Yandex Dialogs posts to the skill.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AliceRequest {
    pub meta: Meta,
    pub session: Session,
    pub request: Request,
    pub version: String,
}

impl Validate for AliceRequest {
    fn check(&self, errs: &mut ValidationErrors) {
        nested(errs, "meta", &self.meta);
        nested(errs, "session", &self.session);
        nested(errs, "request", &self.request);
    }
}

/// Button attached to a card image.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ImageButton {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Validate for ImageButton {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars_opt(errs, "text", self.text.as_deref(), 64);
        absolute_url_opt(errs, "url", self.url.as_deref());
        payload_size(errs, "payload", self.payload.as_ref());
    }
}

/// Suggestion button shown under the reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ResponseButton {
    #[serde(alias = "text")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Remove the button after the user's next utterance.
    #[serde(default)]
    pub hide: bool,
}

impl Validate for ResponseButton {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars(errs, "title", &self.title, 64);
        absolute_url_opt(errs, "url", self.url.as_deref());
        payload_size(errs, "payload", self.payload.as_ref());
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CardImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<ImageButton>,
}

impl Validate for CardImage {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars_opt(errs, "title", self.title.as_deref(), 128);
        max_chars_opt(errs, "description", self.description.as_deref(), 256);
        if let Some(button) = &self.button {
            nested(errs, "button", button);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CardHeader {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CardFooter {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<ImageButton>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum Card {
    BigImage(CardImage),
    ItemsList {
        header: CardHeader,
        items: Vec<CardImage>,
        footer: CardFooter,
    },
    ImageGallery {
        items: Vec<CardImage>,
    },
}

impl Validate for Card {
    fn check(&self, errs: &mut ValidationErrors) {
        match self {
            Card::BigImage(image) => image.check(errs),
            Card::ItemsList {
                header,
                items,
                footer,
            } => {
                if !(2..=4).contains(&items.len()) {
                    errs.push("items", "ItemsList must hold between 2 and 4 images");
                }
                each(errs, "items", items);
                max_chars(errs, "header.text", &header.text, 64);
                max_chars(errs, "footer.text", &footer.text, 64);
                if let Some(button) = &footer.button {
                    nested(errs, "footer.button", button);
                }
            }
            Card::ImageGallery { items } => {
                if !(2..=6).contains(&items.len()) {
                    errs.push("items", "ImageGallery must hold between 2 and 6 images");
                }
                each(errs, "items", items);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Response {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    #[serde(default)]
    pub buttons: Vec<ResponseButton>,
    pub end_session: bool,
}

impl Validate for Response {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.text.trim().is_empty() {
            errs.push("text", "must not be empty");
        }
        max_chars(errs, "text", &self.text, MAX_TEXT_CHARS);
        if let Some(tts) = &self.tts {
            let spoken = tts_length(tts);
            if spoken > MAX_TEXT_CHARS {
                errs.push(
                    "tts",
                    format!(
                        "length without speaker tags must not exceed {} (has {})",
                        MAX_TEXT_CHARS, spoken
                    ),
                );
            }
        }
        if let Some(card) = &self.card {
            nested(errs, "card", card);
        }
        each(errs, "buttons", &self.buttons);
    }
}

/// AppMetrica event.  `value` may nest at most five levels deep.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Event {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Validate for Event {
    fn check(&self, errs: &mut ValidationErrors) {
        if let Some(value) = &self.value {
            if json_depth(value) > MAX_EVENT_DEPTH {
                errs.push("value", "events allow at most five nesting levels");
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Analytics {
    pub events: Vec<Event>,
}

/// Body a skill answers Yandex Dialogs with.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AliceResponse {
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Analytics>,
}

impl Validate for AliceResponse {
    fn check(&self, errs: &mut ValidationErrors) {
        nested(errs, "response", &self.response);
        if let Some(analytics) = &self.analytics {
            each(errs, "analytics.events", &analytics.events);
        }
    }
}

/// Character count of a TTS string with `<speaker ...>` tags removed.
pub fn tts_length(tts: &str) -> usize {
    SPEAKER_TAG.replace_all(tts, "").chars().count()
}

fn payload_size(errs: &mut ValidationErrors, path: &str, payload: Option<&Value>) {
    if let Some(p) = payload {
        let size = p.to_string().len();
        if size > MAX_PAYLOAD_BYTES {
            errs.push(
                path,
                format!("must not exceed {} bytes (has {})", MAX_PAYLOAD_BYTES, size),
            );
        }
    }
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
