//! Error types shared across the relay.  Each concern gets its own enum so
//! callers can match on what actually went wrong; the HTTP layer maps them to
//! `ErrorResponse` bodies.

use std::fmt;

/// Raised by the platform adapters when an expected key is missing from the
/// inbound payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Malformed request JSON: failed to find {0}")]
    Malformed(&'static str),
    #[error("Parameter {0} not found")]
    ParameterNotFound(String),
    #[error("Context with name {0} not found")]
    ContextNotFound(String),
}

/// A single schema violation: dotted path to the offending field and a short
/// human readable message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

/// All violations found while validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ValidationErrors {
    pub violations: Vec<Violation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Merge violations from a nested document, prefixing their paths.
    pub fn nest(&mut self, prefix: &str, inner: ValidationErrors) {
        for v in inner.violations {
            let path = if v.path.is_empty() {
                prefix.to_string()
            } else {
                format!("{}.{}", prefix, v.path)
            };
            self.violations.push(Violation {
                path,
                message: v.message,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.violations.iter().any(|v| v.path == path)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.path, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors from building or delivering an analytics batch.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("cannot set {0} on an agent message")]
    InvalidMessageType(&'static str),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("chatbase request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chatbase responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("forward queue is full")]
    QueueFull,
    #[error("forward queue is closed")]
    QueueClosed,
}

/// Errors from the in-memory entity registry.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("{entity} with {field} = {value} already exists")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
}
