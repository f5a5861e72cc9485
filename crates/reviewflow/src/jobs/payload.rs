//! Create-time payload rules per job kind.
//!
//! Payloads are stored verbatim and never mutate afterwards, so everything a
//! worker or the reconciler later relies on is checked here.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::platform::{JobKind, Operation};

/// Keys that would put secret material into the job table.
pub const SECRET_KEYS: &[&str] = &["password", "cookies", "token", "access_token", "credentials"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub fn validate(kind: JobKind, payload: &Value) -> Result<(), ValidationError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ValidationError::new("payload must be a JSON object"))?;

    reject_secrets(obj)?;

    match kind.operation {
        Operation::Link => Ok(()),
        Operation::Sync => validate_sync(obj),
        Operation::RegisterReply => validate_register_reply(obj),
    }
}

fn reject_secrets(obj: &Map<String, Value>) -> Result<(), ValidationError> {
    for key in obj.keys() {
        if SECRET_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
            return Err(ValidationError::new(format!(
                "payload must not carry secret field `{key}`"
            )));
        }
    }
    Ok(())
}

fn validate_sync(obj: &Map<String, Value>) -> Result<(), ValidationError> {
    for key in ["from", "to"] {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if parse_day(s).is_some() => {}
            Some(_) => {
                return Err(ValidationError::new(format!(
                    "`{key}` must be a YYYY-MM-DD date"
                )))
            }
        }
    }

    if let (Some(from), Some(to)) = (day_field(obj, "from"), day_field(obj, "to")) {
        if from > to {
            return Err(ValidationError::new("`from` must not be after `to`"));
        }
    }

    match obj.get("fetch_all") {
        None | Some(Value::Null) | Some(Value::Bool(_)) => Ok(()),
        Some(_) => Err(ValidationError::new("`fetch_all` must be a boolean")),
    }
}

fn validate_register_reply(obj: &Map<String, Value>) -> Result<(), ValidationError> {
    for key in ["review_id", "reviewId", "external_id", "written_at"] {
        match obj.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => {
                return Err(ValidationError::new(format!("`{key}` must be a string")));
            }
        }
    }

    let filled = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };

    if !["review_id", "reviewId", "external_id"].iter().any(|k| filled(k)) {
        return Err(ValidationError::new(
            "register_reply payload requires a non-empty `review_id` or `external_id`",
        ));
    }
    if !filled("content") {
        return Err(ValidationError::new(
            "register_reply payload requires a non-empty `content`",
        ));
    }

    Ok(())
}

pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn day_field(obj: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    obj.get(key).and_then(Value::as_str).and_then(parse_day)
}

/// The review a register_reply job targets, as carried by its payload.
///
/// At least one of `review_id` and `external_id` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub review_id: Option<String>,
    pub external_id: Option<String>,
    pub content: String,
}

impl ReplyTarget {
    pub fn from_value(v: &Value) -> Option<Self> {
        let text = |key: &str| {
            v.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let review_id = text("review_id").or_else(|| text("reviewId"));
        let external_id = text("external_id");
        if review_id.is_none() && external_id.is_none() {
            return None;
        }

        Some(Self {
            review_id,
            external_id,
            content: v.get("content").and_then(Value::as_str)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use serde_json::json;

    fn kind(op: Operation) -> JobKind {
        JobKind::new(Platform::Baemin, op)
    }

    #[test]
    fn payload_must_be_object() {
        assert!(validate(kind(Operation::Link), &json!([])).is_err());
        assert!(validate(kind(Operation::Link), &json!(null)).is_err());
        assert!(validate(kind(Operation::Link), &json!({})).is_ok());
    }

    #[test]
    fn secret_keys_are_rejected_for_every_kind() {
        for op in [Operation::Link, Operation::Sync, Operation::RegisterReply] {
            for key in SECRET_KEYS {
                let mut payload = json!({ "external_id": "r1", "content": "thanks" });
                payload[*key] = json!("x");
                let err = validate(kind(op), &payload).unwrap_err();
                assert!(err.0.contains(key), "{op}: {err}");
            }
        }
        assert!(validate(kind(Operation::Link), &json!({ "Password": "x" })).is_err());
    }

    #[test]
    fn sync_dates_must_be_calendar_days() {
        let k = kind(Operation::Sync);
        assert!(validate(k, &json!({ "from": "2024-01-01", "to": "2024-06-30" })).is_ok());
        assert!(validate(k, &json!({ "from": "2024-13-01" })).is_err());
        assert!(validate(k, &json!({ "to": "01/02/2024" })).is_err());
        assert!(validate(k, &json!({ "from": 20240101 })).is_err());
        assert!(validate(k, &json!({ "from": "2024-06-30", "to": "2024-01-01" })).is_err());
    }

    #[test]
    fn sync_fetch_all_must_be_bool() {
        let k = kind(Operation::Sync);
        assert!(validate(k, &json!({ "fetch_all": true })).is_ok());
        assert!(validate(k, &json!({ "fetch_all": "yes" })).is_err());
    }

    #[test]
    fn register_reply_needs_target_and_content() {
        let k = kind(Operation::RegisterReply);
        assert!(validate(k, &json!({ "external_id": "r1", "content": "thanks" })).is_ok());
        assert!(validate(k, &json!({ "content": "thanks" })).is_err());
        assert!(validate(k, &json!({ "review_id": " ", "content": "thanks" })).is_err());
        assert!(validate(k, &json!({ "external_id": "r1", "content": "  " })).is_err());
        assert!(validate(k, &json!({ "external_id": 42, "content": "thanks" })).is_err());
        assert!(validate(
            k,
            &json!({ "external_id": "r1", "content": "thanks", "review_id": 5 })
        )
        .is_err());
    }

    #[test]
    fn reply_target_accepts_camel_case_review_id() {
        let t = ReplyTarget::from_value(&json!({
            "reviewId": "7b1c", "external_id": "r1", "content": "thanks"
        }))
        .unwrap();
        assert_eq!(t.review_id.as_deref(), Some("7b1c"));
        assert_eq!(t.external_id.as_deref(), Some("r1"));
    }

    #[test]
    fn register_reply_by_internal_review_id_alone() {
        let payload = json!({ "review_id": "R1", "content": "Thanks!" });
        assert!(validate(kind(Operation::RegisterReply), &payload).is_ok());

        let t = ReplyTarget::from_value(&payload).unwrap();
        assert_eq!(t.review_id.as_deref(), Some("R1"));
        assert_eq!(t.external_id, None);
        assert_eq!(t.content, "Thanks!");

        assert_eq!(ReplyTarget::from_value(&json!({ "content": "Thanks!" })), None);
    }
}
