//! Turns whatever the node sent back on failure into a user-facing message.
//!
//! Node errors frequently arrive as JSON documents whose `message` is itself
//! a JSON document, several levels deep. The innermost text is unwrapped,
//! matched against known failure patterns and kept as `detail` so the
//! original diagnostic is never lost. Classification is total: every input,
//! however malformed, yields a [`ClassifiedError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lightning::backend::BackendError;

pub const GENERIC_FAILURE: &str = "Operation failed";

const MAX_UNWRAP_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientFee,
    ReplacementRejected,
    PeerUnsupported,
    Timeout,
    InsufficientFunds,
    BroadcastFailure,
    /// The node's own text was descriptive enough to show as is.
    BackendMessage,
    Generic,
}

// First match wins.
const RULES: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::InsufficientFee,
        &["insufficient fee", "error code: -26"],
    ),
    (FailureKind::ReplacementRejected, &["rejecting replacement"]),
    (
        FailureKind::PeerUnsupported,
        &["Peer does not support splicing"],
    ),
    (FailureKind::Timeout, &["timeout", "timed out"]),
    (FailureKind::InsufficientFunds, &["not enough funds"]),
    (FailureKind::BroadcastFailure, &["Error broadcasting"]),
];

impl FailureKind {
    fn user_message(self) -> Option<&'static str> {
        let msg = match self {
            Self::InsufficientFee => {
                "Insufficient fee. The fee rate might be too low for current network conditions. Try enabling force feerate or use a higher fee rate."
            }
            Self::ReplacementRejected => {
                "Transaction replacement rejected. The new fee rate must be higher than the existing transaction. Try with a higher fee rate."
            }
            Self::PeerUnsupported => "The peer does not support splicing operations.",
            Self::Timeout => "Operation timed out. Please try again.",
            Self::InsufficientFunds => "Insufficient funds for this operation.",
            Self::BroadcastFailure => {
                "Failed to broadcast transaction. Please check network conditions and try again."
            }
            Self::BackendMessage => return None,
            Self::Generic => GENERIC_FAILURE,
        };
        Some(msg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: FailureKind,
    pub message: String,
    /// Innermost text extracted from the node's payload.
    pub detail: Option<String>,
}

impl ClassifiedError {
    pub fn generic(detail: Option<String>) -> Self {
        Self {
            kind: FailureKind::Generic,
            message: GENERIC_FAILURE.to_string(),
            detail,
        }
    }
}

pub fn classify_backend_error(err: &BackendError, verbatim_min_len: usize) -> ClassifiedError {
    classify(Some(&err.payload()), verbatim_min_len)
}

pub fn classify(raw: Option<&Value>, verbatim_min_len: usize) -> ClassifiedError {
    let Some(message) = raw.and_then(initial_message) else {
        return ClassifiedError::generic(None);
    };

    let message = unwrap_nested(message);

    if let Some(kind) = RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| message.contains(n)))
        .map(|(kind, _)| *kind)
    {
        return ClassifiedError {
            kind,
            message: kind.user_message().unwrap_or(GENERIC_FAILURE).to_string(),
            detail: Some(message),
        };
    }

    if message.chars().count() > verbatim_min_len {
        return ClassifiedError {
            kind: FailureKind::BackendMessage,
            message: message.clone(),
            detail: Some(message),
        };
    }

    ClassifiedError::generic(Some(message))
}

fn initial_message(raw: &Value) -> Option<String> {
    match raw {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => Some(raw.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn unwrap_nested(mut current: String) -> String {
    for _ in 0..MAX_UNWRAP_DEPTH {
        let trimmed = current.trim_start();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            break;
        }

        let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
            break;
        };

        let next = ["message", "error"]
            .iter()
            .find_map(|key| parsed.get(*key).filter(|v| is_truthy(v)));

        match next {
            Some(Value::String(s)) if *s != current => current = s.clone(),
            _ => break,
        }
    }
    current
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}
