//! Accessors over a Telegram message carried in a Dialogflow payload.

use serde_json::Value;

use crate::error::AdapterError;

#[derive(Debug, Clone)]
pub struct TelegramHandler<'a> {
    data: &'a Value,
}

impl<'a> TelegramHandler<'a> {
    /// Wrap `payload.data`; fails when the payload carries no message.
    pub fn new(payload: &'a Value) -> Result<Self, AdapterError> {
        payload
            .get("data")
            .filter(|d| d.is_object())
            .map(|data| Self { data })
            .ok_or(AdapterError::Malformed("telegram payload data"))
    }

    /// Analytics user id: `<from.id>-<from.language_code>.telegram_client`.
    pub fn uid(&self) -> Result<String, AdapterError> {
        Ok(format!(
            "{}-{}.telegram_client",
            self.user_id()?,
            self.lang_code()?
        ))
    }

    /// Unix time the message was sent.
    pub fn date(&self) -> Result<i64, AdapterError> {
        self.int_at("/date", "date")
    }

    pub fn chat_id(&self) -> Result<i64, AdapterError> {
        self.int_at("/chat/id", "chat.id")
    }

    pub fn chat_type(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/chat/type", "chat.type")
    }

    pub fn user_id(&self) -> Result<i64, AdapterError> {
        self.int_at("/from/id", "from.id")
    }

    pub fn user_first_name(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/from/first_name", "from.first_name")
    }

    pub fn user_last_name(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/from/last_name", "from.last_name")
    }

    pub fn username(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/from/username", "from.username")
    }

    pub fn lang_code(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/from/language_code", "from.language_code")
    }

    pub fn message_id(&self) -> Result<i64, AdapterError> {
        self.int_at("/message_id", "message_id")
    }

    /// Message text; absent for stickers, photos and service messages.
    pub fn text(&self) -> Result<&'a str, AdapterError> {
        self.str_at("/text", "text")
    }

    fn str_at(&self, pointer: &str, field: &'static str) -> Result<&'a str, AdapterError> {
        self.data
            .pointer(pointer)
            .and_then(Value::as_str)
            .ok_or(AdapterError::Malformed(field))
    }

    fn int_at(&self, pointer: &str, field: &'static str) -> Result<i64, AdapterError> {
        self.data
            .pointer(pointer)
            .and_then(Value::as_i64)
            .ok_or(AdapterError::Malformed(field))
    }
}
