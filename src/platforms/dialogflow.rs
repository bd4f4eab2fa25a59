//! Accessors over a raw Dialogflow fulfillment request and a builder for the
//! fulfillment response.
//!
//! `WebhookHandler` works on an untyped `serde_json::Value` rather than the
//! typed [`crate::schema::dialogflow::WebhookRequest`]: the relay must keep
//! forwarding analytics for payloads that fail strict validation, so every
//! getter degrades per field instead of failing the whole document.

use serde_json::{json, Map, Value};

use crate::error::AdapterError;

/// Read-only view over a Dialogflow `WebhookRequest` body.
#[derive(Debug, Clone)]
pub struct WebhookHandler {
    data: Value,
}

impl WebhookHandler {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn raw(&self) -> &Value {
        &self.data
    }

    pub fn into_inner(self) -> Value {
        self.data
    }

    /// Overwrite `originalDetectIntentRequest.source`, creating the object
    /// when the request carried none.
    pub fn set_source(&mut self, platform: &str) {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        let Some(root) = self.data.as_object_mut() else {
            return;
        };
        let odir = root
            .entry("originalDetectIntentRequest")
            .or_insert_with(|| Value::Object(Map::new()));
        if !odir.is_object() {
            *odir = Value::Object(Map::new());
        }
        if let Some(obj) = odir.as_object_mut() {
            obj.insert("source".into(), Value::String(platform.to_string()));
        }
    }

    pub fn intent(&self) -> Result<&Map<String, Value>, AdapterError> {
        self.data
            .pointer("/queryResult/intent")
            .and_then(Value::as_object)
            .ok_or(AdapterError::Malformed("intent"))
    }

    /// Fully qualified intent resource name.
    pub fn intent_name(&self) -> Result<&str, AdapterError> {
        self.str_at("/queryResult/intent/name")
            .ok_or(AdapterError::Malformed("intent name"))
    }

    /// Name the intent was given in the Dialogflow console.
    pub fn intent_display_name(&self) -> Result<&str, AdapterError> {
        self.str_at("/queryResult/intent/displayName")
            .ok_or(AdapterError::Malformed("intent display name"))
    }

    pub fn parameters(&self) -> Map<String, Value> {
        self.data
            .pointer("/queryResult/parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn parameter(&self, name: &str) -> Result<&Value, AdapterError> {
        self.data
            .pointer("/queryResult/parameters")
            .and_then(|p| p.get(name))
            .ok_or_else(|| AdapterError::ParameterNotFound(name.to_string()))
    }

    pub fn action(&self) -> &str {
        self.str_at("/queryResult/action").unwrap_or("")
    }

    pub fn session_id(&self) -> Result<&str, AdapterError> {
        self.data
            .get("session")
            .and_then(Value::as_str)
            .ok_or(AdapterError::Malformed("session id"))
    }

    /// Output context whose short name (last path segment) matches `name`.
    pub fn context_by_name(&self, name: &str) -> Result<&Map<String, Value>, AdapterError> {
        self.data
            .pointer("/queryResult/outputContexts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .find(|ctx| {
                ctx.get("name")
                    .and_then(Value::as_str)
                    .and_then(|full| full.rsplit('/').next())
                    == Some(name)
            })
            .ok_or_else(|| AdapterError::ContextNotFound(name.to_string()))
    }

    /// Google Assistant surface capabilities; empty for other platforms.
    pub fn capabilities(&self) -> Vec<String> {
        self.data
            .pointer("/originalDetectIntentRequest/payload/surface/capabilities")
            .and_then(Value::as_array)
            .map(|caps| {
                caps.iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Platform specific payload; an empty object when absent.
    pub fn payload(&self) -> &Value {
        static EMPTY: once_cell::sync::Lazy<Value> =
            once_cell::sync::Lazy::new(|| Value::Object(Map::new()));
        self.data
            .pointer("/originalDetectIntentRequest/payload")
            .filter(|p| p.is_object())
            .unwrap_or(&EMPTY)
    }

    pub fn source(&self) -> &str {
        self.str_at("/originalDetectIntentRequest/source")
            .unwrap_or("")
    }

    pub fn fulfillment_text(&self) -> &str {
        self.str_at("/queryResult/fulfillmentText").unwrap_or("")
    }

    pub fn query_text(&self) -> &str {
        self.str_at("/queryResult/queryText").unwrap_or("")
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.data.pointer(pointer).and_then(Value::as_str)
    }
}

/// Builds the JSON body answered to Dialogflow.  Generic rich messages go to
/// `fulfillmentMessages`; Google Assistant items go to `payload.google`.
#[derive(Debug, Default, Clone)]
pub struct ResponseBuilder {
    fulfillment_text: Option<String>,
    generic_messages: Vec<Value>,
    generic_card_index: Option<usize>,
    contexts: Vec<Value>,
    event: Option<Value>,
    google_items: Vec<Value>,
    google_suggestions: Vec<Value>,
    google_carousel_index: Option<usize>,
    google_table_index: Option<usize>,
    google_card_added: bool,
    google_end_conversation: bool,
    permission: Option<Value>,
}

/// Options for [`ResponseBuilder::google_assistant_card`].
#[derive(Debug, Default, Clone)]
pub struct GoogleCard<'a> {
    pub title: &'a str,
    pub subtitle: &'a str,
    pub formatted_text: &'a str,
    pub button: Option<(&'a str, &'a str)>,
    pub image: Option<(&'a str, &'a str)>,
    pub image_display_option: Option<&'a str>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("{0} must be created first")]
    Missing(&'static str),
    #[error("google assistant suggestions need at least one rich response item")]
    SuggestionsWithoutItems,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or change a context; `session` is the full session resource name.
    pub fn add_context(
        &mut self,
        session: &str,
        name: &str,
        lifespan: u32,
        params: Option<Map<String, Value>>,
    ) -> &mut Self {
        self.contexts.push(json!({
            "name": format!("{}/contexts/{}", session, name),
            "lifespanCount": lifespan,
            "parameters": params.unwrap_or_default(),
        }));
        self
    }

    /// Trigger a followup event.  Everything except contexts is dropped from
    /// the final response when an event is set.
    pub fn trigger_event(
        &mut self,
        name: &str,
        params: Map<String, Value>,
        language_code: &str,
    ) -> &mut Self {
        self.event = Some(json!({
            "name": name,
            "parameters": params,
            "languageCode": language_code,
        }));
        self
    }

    pub fn simple_response(&mut self, speech: &str) -> &mut Self {
        self.fulfillment_text = Some(speech.to_string());
        self
    }

    pub fn generic_rich_text_response(&mut self, text: &str) -> &mut Self {
        self.generic_messages.push(json!({"text": {"text": [text]}}));
        self
    }

    pub fn generic_card(&mut self, title: &str, subtitle: &str, image_url: Option<&str>) -> &mut Self {
        let mut card = json!({"title": title, "subtitle": subtitle});
        if let Some(url) = image_url.filter(|u| !u.is_empty()) {
            card["imageUri"] = json!(url);
        }
        self.generic_messages.push(json!({"card": card}));
        self.generic_card_index = Some(self.generic_messages.len() - 1);
        self
    }

    pub fn generic_card_add_button(&mut self, title: &str, link: &str) -> Result<&mut Self, BuilderError> {
        let idx = self.generic_card_index.ok_or(BuilderError::Missing("generic_card"))?;
        let card = &mut self.generic_messages[idx]["card"];
        if !card.get("buttons").map(Value::is_array).unwrap_or(false) {
            card["buttons"] = json!([]);
        }
        if let Some(buttons) = card["buttons"].as_array_mut() {
            buttons.push(json!({"text": title, "postback": link}));
        }
        Ok(self)
    }

    pub fn generic_add_suggestions(&mut self, suggestions: &[&str], title: &str) -> &mut Self {
        self.generic_messages.push(json!({
            "quickReplies": {"title": title, "quickReplies": suggestions}
        }));
        self
    }

    pub fn generic_image(&mut self, image_url: &str, alt: &str) -> &mut Self {
        self.generic_messages.push(json!({
            "image": {"imageUri": image_url, "accessibilityText": alt}
        }));
        self
    }

    /// Speech bubble; must come before any other Google Assistant item.
    pub fn google_assistant_response(
        &mut self,
        speech: &str,
        display_text: Option<&str>,
        end_conversation: bool,
    ) -> &mut Self {
        self.google_end_conversation = end_conversation;
        let mut simple = json!({"textToSpeech": speech});
        if let Some(text) = display_text.filter(|t| !t.is_empty()) {
            simple["displayText"] = json!(text);
        }
        self.google_items.push(json!({"simpleResponse": simple}));
        self
    }

    pub fn google_assistant_card(&mut self, card: GoogleCard<'_>) -> &mut Self {
        if self.google_card_added {
            tracing::warn!("only one Google Assistant card is allowed; ignoring");
            return self;
        }
        self.google_card_added = true;
        let mut basic = json!({
            "title": card.title,
            "subtitle": card.subtitle,
            "formattedText": card.formatted_text,
        });
        if let Some((name, url)) = card.button {
            basic["buttons"] = json!([{"title": name, "openUrlAction": {"url": url}}]);
        }
        if let Some((url, alt)) = card.image {
            basic["image"] = json!({"url": url, "accessibilityText": alt});
        }
        if let Some(opt) = card.image_display_option {
            basic["imageDisplayOptions"] = json!(opt);
        }
        self.google_items.push(json!({"basicCard": basic}));
        self
    }

    pub fn google_assistant_new_carousel(&mut self) -> &mut Self {
        if self.google_carousel_index.is_some() {
            tracing::warn!("only one Google Assistant carousel is allowed; ignoring");
            return self;
        }
        self.google_items.push(json!({"carouselBrowse": {"items": []}}));
        self.google_carousel_index = Some(self.google_items.len() - 1);
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn google_assistant_carousel_add_item(
        &mut self,
        title: &str,
        url: &str,
        image_url: &str,
        image_alt: &str,
        description: &str,
        footer: &str,
    ) -> Result<&mut Self, BuilderError> {
        let idx = self
            .google_carousel_index
            .ok_or(BuilderError::Missing("google_assistant_new_carousel"))?;
        if let Some(items) = self.google_items[idx]["carouselBrowse"]["items"].as_array_mut() {
            items.push(json!({
                "title": title,
                "openUrlAction": {"url": url},
                "description": description,
                "footer": footer,
                "image": {"url": image_url, "accessibilityText": image_alt},
            }));
        }
        Ok(self)
    }

    pub fn google_assistant_add_suggestions(&mut self, suggestions: &[&str]) -> &mut Self {
        self.google_suggestions
            .extend(suggestions.iter().map(|s| json!({"title": s})));
        self
    }

    pub fn google_assistant_new_table(
        &mut self,
        title: Option<&str>,
        subtitle: Option<&str>,
        image: Option<(&str, &str)>,
    ) -> &mut Self {
        if self.google_table_index.is_some() {
            tracing::warn!("only one Google Assistant table is allowed; ignoring");
            return self;
        }
        let mut table = json!({"rows": [], "columnProperties": []});
        if let Some((url, alt)) = image {
            table["image"] = json!({"url": url, "accessibilityText": alt});
        }
        if let Some(t) = title.filter(|t| !t.is_empty()) {
            table["title"] = json!(t);
        }
        if let Some(s) = subtitle.filter(|s| !s.is_empty()) {
            table["subtitle"] = json!(s);
        }
        self.google_items.push(json!({"tableCard": table}));
        self.google_table_index = Some(self.google_items.len() - 1);
        self
    }

    pub fn google_assistant_table_add_header_row(&mut self, headers: &[&str]) -> Result<&mut Self, BuilderError> {
        let idx = self
            .google_table_index
            .ok_or(BuilderError::Missing("google_assistant_new_table"))?;
        if let Some(cols) = self.google_items[idx]["tableCard"]["columnProperties"].as_array_mut() {
            cols.extend(headers.iter().map(|h| json!({"header": h})));
        }
        Ok(self)
    }

    pub fn google_assistant_table_add_row(
        &mut self,
        cells: &[&str],
        divider_after: bool,
    ) -> Result<&mut Self, BuilderError> {
        let idx = self
            .google_table_index
            .ok_or(BuilderError::Missing("google_assistant_new_table"))?;
        let cells: Vec<Value> = cells.iter().map(|c| json!({"text": c})).collect();
        if let Some(rows) = self.google_items[idx]["tableCard"]["rows"].as_array_mut() {
            rows.push(json!({"cells": cells, "dividerAfter": divider_after}));
        }
        Ok(self)
    }

    pub fn google_assistant_media_response(
        &mut self,
        media_url: &str,
        description: &str,
        display_name: &str,
        icon: Option<(&str, &str)>,
    ) -> &mut Self {
        let (icon_url, icon_alt) = icon.unwrap_or(("", ""));
        self.google_items.push(json!({
            "mediaResponse": {
                "mediaType": "AUDIO",
                "mediaObjects": [{
                    "contentUrl": media_url,
                    "description": description,
                    "icon": {"url": icon_url, "accessibilityText": icon_alt},
                    "name": display_name,
                }],
            }
        }));
        self
    }

    /// Ask for user details such as name or location.
    pub fn google_assistant_ask_permission(&mut self, speech: &str, permissions: &[&str]) -> &mut Self {
        self.permission = Some(json!({
            "intent": "actions.intent.PERMISSION",
            "data": {
                "@type": "type.googleapis.com/google.actions.v2.PermissionValueSpec",
                "optContext": speech,
                "permissions": permissions,
            }
        }));
        self
    }

    /// Assemble the final fulfillment body.
    pub fn build(&self) -> Result<Value, BuilderError> {
        let mut out = Map::new();
        if !self.contexts.is_empty() {
            out.insert("outputContexts".into(), Value::Array(self.contexts.clone()));
        }
        if let Some(event) = &self.event {
            out.insert("followupEventInput".into(), event.clone());
            return Ok(Value::Object(out));
        }
        if let Some(text) = &self.fulfillment_text {
            out.insert("fulfillmentText".into(), json!(text));
        }
        if !self.generic_messages.is_empty() {
            out.insert(
                "fulfillmentMessages".into(),
                Value::Array(self.generic_messages.clone()),
            );
        }

        let expect_response = !self.google_end_conversation;
        let mut google: Option<Map<String, Value>> = None;
        if !self.google_items.is_empty() {
            let first_is_simple = self.google_items[0].get("simpleResponse").is_some();
            if !first_is_simple {
                tracing::warn!(
                    "first Google Assistant item should be a simple response; call google_assistant_response first"
                );
            }
            let mut g = Map::new();
            g.insert("expectUserResponse".into(), json!(expect_response));
            g.insert(
                "richResponse".into(),
                json!({"items": self.google_items.clone()}),
            );
            google = Some(g);
        }
        if !self.google_suggestions.is_empty() {
            let g = google.as_mut().ok_or(BuilderError::SuggestionsWithoutItems)?;
            if let Some(rich) = g.get_mut("richResponse").and_then(Value::as_object_mut) {
                rich.insert(
                    "suggestions".into(),
                    Value::Array(self.google_suggestions.clone()),
                );
            }
        }
        if let Some(permission) = &self.permission {
            let g = google.get_or_insert_with(|| {
                let mut g = Map::new();
                g.insert("expectUserResponse".into(), json!(expect_response));
                g
            });
            g.insert("systemIntent".into(), permission.clone());
        }
        if let Some(g) = google {
            out.insert("payload".into(), json!({"google": g}));
        }
        Ok(Value::Object(out))
    }
}
