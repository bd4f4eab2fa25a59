//! Dialogflow ES fulfillment documents: the `WebhookRequest` Dialogflow posts
//! to the relay and the `WebhookResponse` a fulfillment service answers with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{absolute_url, absolute_url_opt, each, nested, range_f64, Validate};
use crate::error::ValidationErrors;

/// Plain text reply variants.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Text {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_text: Option<String>,
}

impl Validate for Image {
    fn check(&self, errs: &mut ValidationErrors) {
        absolute_url_opt(errs, "imageUri", self.image_uri.as_deref());
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuickReplies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_replies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Button {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Text or URL sent back when the button is pressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback: Option<String>,
}

/// Google Assistant speech bubble.  Exactly one of `textToSpeech` / `ssml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleActionSimpleResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_to_speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

impl Validate for GoogleActionSimpleResponse {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.text_to_speech.is_some() && self.ssml.is_some() {
            errs.push("", "only one of textToSpeech or ssml may be provided");
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<Button>>,
}

impl Validate for Card {
    fn check(&self, errs: &mut ValidationErrors) {
        absolute_url_opt(errs, "imageUri", self.image_uri.as_deref());
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleActionBasicCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<Button>>,
}

impl Validate for GoogleActionBasicCard {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.formatted_text.is_none() && self.image.is_none() {
            errs.push("formattedText", "formattedText required, unless image is present");
        }
        if let Some(image) = &self.image {
            nested(errs, "image", image);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GoogleActionSuggestion {
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleActionLinkOutSuggestion {
    pub destination_name: String,
    pub uri: String,
}

impl Validate for GoogleActionLinkOutSuggestion {
    fn check(&self, errs: &mut ValidationErrors) {
        absolute_url(errs, "uri", &self.uri);
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SelectItemInfo {
    /// Sent back to the agent when this option is picked.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonyms: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SelectItem {
    pub info: SelectItemInfo,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

impl Validate for SelectItem {
    fn check(&self, errs: &mut ValidationErrors) {
        if let Some(image) = &self.image {
            nested(errs, "image", image);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GoogleActionsListSelect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub items: Vec<SelectItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GoogleActionCarouselSelect {
    pub items: Vec<SelectItem>,
}

/// One rich response message.  Dialogflow sends exactly one of the payload
/// fields per message; the schema keeps them all optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Text>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_replies: Option<QuickReplies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_responses: Option<Vec<GoogleActionSimpleResponse>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_card: Option<GoogleActionBasicCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<GoogleActionSuggestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_out_suggestion: Option<GoogleActionLinkOutSuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_select: Option<GoogleActionsListSelect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carousel_select: Option<GoogleActionCarouselSelect>,
}

impl Validate for Message {
    fn check(&self, errs: &mut ValidationErrors) {
        if let Some(image) = &self.image {
            nested(errs, "image", image);
        }
        if let Some(card) = &self.card {
            nested(errs, "card", card);
        }
        if let Some(responses) = &self.simple_responses {
            each(errs, "simpleResponses", responses);
        }
        if let Some(card) = &self.basic_card {
            nested(errs, "basicCard", card);
        }
        if let Some(link) = &self.link_out_suggestion {
            nested(errs, "linkOutSuggestion", link);
        }
        if let Some(list) = &self.list_select {
            each(errs, "listSelect.items", &list.items);
        }
        if let Some(carousel) = &self.carousel_select {
            each(errs, "carouselSelect.items", &carousel.items);
        }
    }
}

/// The integration request that triggered the detect-intent call.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OriginalDetectIntentRequest {
    /// e.g. `telegram`, `google`, `slack`.  Absent for custom integrations
    /// such as Yandex Alice bridges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_interaction: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fallback: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub name: String,
    /// Conversational turns before the context expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifespan_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

impl Validate for Context {
    fn check(&self, errs: &mut ValidationErrors) {
        if let Some(n) = self.lifespan_count {
            if n <= 0 {
                errs.push("lifespanCount", "ensure this value is greater than 0");
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_required_params_present: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancels_slot_filling: Option<bool>,
    pub query_text: String,
    pub fulfillment_text: String,
    pub fulfillment_messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_payload: Option<Map<String, Value>>,
    pub output_contexts: Vec<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_detection_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_info: Option<Map<String, Value>>,
    pub language_code: String,
    /// Keys Dialogflow adds that the relay does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Validate for QueryResult {
    fn check(&self, errs: &mut ValidationErrors) {
        each(errs, "fulfillmentMessages", &self.fulfillment_messages);
        each(errs, "outputContexts", &self.output_contexts);
        if let Some(conf) = self.intent_detection_confidence {
            range_f64(errs, "intentDetectionConfidence", conf, 0.0, 1.0);
        }
    }
}

/// Request body Dialogflow posts to the fulfillment webhook.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub response_id: String,
    pub session: String,
    pub original_detect_intent_request: OriginalDetectIntentRequest,
    pub query_result: QueryResult,
}

impl Validate for WebhookRequest {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.session.trim().is_empty() {
            errs.push("session", "must not be empty");
        }
        nested(errs, "queryResult", &self.query_result);
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(alias = "language_code")]
    pub language_code: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Entity {
    pub value: String,
    pub synonyms: Vec<String>,
}

/// Session-scoped entity overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntityType {
    pub name: String,
    pub entity_override_mode: Value,
    pub entities: Vec<Entity>,
}

/// Fulfillment answer returned to Dialogflow.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_text: Option<String>,
    #[serde(default)]
    pub fulfillment_messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_contexts: Option<Vec<Context>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_event_input: Option<EventInput>,
    #[serde(default)]
    pub live_agent_handoff: bool,
    #[serde(default)]
    pub end_interaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_entity_types: Option<Vec<SessionEntityType>>,
}

impl Validate for WebhookResponse {
    fn check(&self, errs: &mut ValidationErrors) {
        each(errs, "fulfillmentMessages", &self.fulfillment_messages);
        if let Some(contexts) = &self.output_contexts {
            each(errs, "outputContexts", contexts);
        }
    }
}
