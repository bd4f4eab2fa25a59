//! Typed request/response documents for the chat platforms the relay talks
//! to, plus the field constraints each platform documents.
//!
//! Deserialization only checks shape (required keys, JSON types).  Length,
//! range and cross-field rules are checked by [`Validate::validate`] so that
//! all violations in a document are reported together.

use crate::error::ValidationErrors;

pub mod alice;
pub mod dialogflow;
pub mod telegram;

/// Implemented by every schema document.
pub trait Validate {
    /// Push every violation found in `self` into `errs`.  Paths are relative
    /// to `self`; callers nest them.
    fn check(&self, errs: &mut ValidationErrors);

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        self.check(&mut errs);
        errs.into_result()
    }
}

impl<T: Validate> Validate for Option<T> {
    fn check(&self, errs: &mut ValidationErrors) {
        if let Some(inner) = self {
            inner.check(errs);
        }
    }
}

/// Validate a nested document and merge its violations under `path`.
pub(crate) fn nested<T: Validate>(errs: &mut ValidationErrors, path: &str, doc: &T) {
    let mut inner = ValidationErrors::new();
    doc.check(&mut inner);
    errs.nest(path, inner);
}

/// Validate every element of a list, nesting each under `path[i]`.
pub(crate) fn each<T: Validate>(errs: &mut ValidationErrors, path: &str, items: &[T]) {
    for (i, item) in items.iter().enumerate() {
        nested(errs, &format!("{}[{}]", path, i), item);
    }
}

/// Length in characters, matching how the platforms count.
pub(crate) fn max_chars(errs: &mut ValidationErrors, path: &str, value: &str, max: usize) {
    let len = value.chars().count();
    if len > max {
        errs.push(
            path,
            format!("ensure this value has at most {} characters (has {})", max, len),
        );
    }
}

pub(crate) fn max_chars_opt(
    errs: &mut ValidationErrors,
    path: &str,
    value: Option<&str>,
    max: usize,
) {
    if let Some(v) = value {
        max_chars(errs, path, v, max);
    }
}

pub(crate) fn range_f64(errs: &mut ValidationErrors, path: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        errs.push(
            path,
            format!("ensure this value is between {} and {}", min, max),
        );
    }
}

pub(crate) fn range_i64(errs: &mut ValidationErrors, path: &str, value: i64, min: i64, max: i64) {
    if value < min || value > max {
        errs.push(
            path,
            format!("ensure this value is between {} and {}", min, max),
        );
    }
}

/// Absolute URL check (scheme and host required).
pub(crate) fn absolute_url(errs: &mut ValidationErrors, path: &str, value: &str) {
    match url::Url::parse(value) {
        Ok(u) if u.has_host() => {}
        _ => errs.push(path, "invalid or missing URL scheme"),
    }
}

pub(crate) fn absolute_url_opt(errs: &mut ValidationErrors, path: &str, value: Option<&str>) {
    if let Some(v) = value {
        absolute_url(errs, path, v);
    }
}

/// Check a raw fulfillment request: the Dialogflow envelope plus, when
/// recognisable, the Telegram message or Alice request it carries.  Shape
/// errors are reported as violations at the offending document's root.
pub fn check_webhook(raw: &serde_json::Value) -> ValidationErrors {
    let mut errs = ValidationErrors::new();
    check_value::<dialogflow::WebhookRequest>(&mut errs, "", raw);

    let odir = raw.get("originalDetectIntentRequest");
    let source = odir
        .and_then(|o| o.get("source"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    let payload = odir.and_then(|o| o.get("payload"));
    match (source, payload) {
        ("telegram", Some(p)) => {
            if let Some(data) = p.get("data") {
                check_value::<telegram::Message>(
                    &mut errs,
                    "originalDetectIntentRequest.payload.data",
                    data,
                );
            }
        }
        ("", Some(p)) if p.pointer("/meta/client_id").is_some() => {
            check_value::<alice::AliceRequest>(&mut errs, "originalDetectIntentRequest.payload", p);
        }
        _ => {}
    }
    errs
}

fn check_value<T>(errs: &mut ValidationErrors, path: &str, value: &serde_json::Value)
where
    T: serde::de::DeserializeOwned + Validate,
{
    match serde_json::from_value::<T>(value.clone()) {
        Ok(doc) => {
            let mut inner = ValidationErrors::new();
            doc.check(&mut inner);
            if path.is_empty() {
                errs.violations.extend(inner.violations);
            } else {
                errs.nest(path, inner);
            }
        }
        Err(e) => errs.push(path, e.to_string()),
    }
}
