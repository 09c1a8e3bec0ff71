//! Queue message bodies
//!
//! Both queues receive SNS-style envelopes, `{"Message": "..."}`, whose `Message` is itself a
//! string: a book id or a JSON array of ids for population, a JSON object listing users for
//! recommendation.
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message body has no Message field")]
    MissingMessage,

    #[error("{0:?} is not a valid id")]
    InvalidId(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersPayload {
    users: Vec<String>,
}

fn inner_message(body: &str) -> Result<Value, MessageError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    match envelope.message.ok_or(MessageError::MissingMessage)? {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('[') || trimmed.starts_with('{') {
                Ok(serde_json::from_str(trimmed)?)
            } else {
                Ok(Value::String(trimmed.to_owned()))
            }
        }
        other => Ok(other),
    }
}

fn parse_id(text: &str) -> Result<Uuid, MessageError> {
    Uuid::parse_str(text.trim()).map_err(|_| MessageError::InvalidId(text.to_owned()))
}

/// Book ids of a population message
///
/// # Errors
/// Fails on invalid JSON, a missing `Message`, or any entry that is not a UUID.
#[allow(clippy::missing_inline_in_public_items, reason = "Called once per message")]
pub fn population_ids(body: &str) -> Result<Vec<Uuid>, MessageError> {
    match inner_message(body)? {
        Value::String(id) => Ok(vec![parse_id(&id)?]),
        Value::Array(ids) => ids
            .iter()
            .map(|id| match id {
                Value::String(id) => parse_id(id),
                other => Err(MessageError::InvalidId(other.to_string())),
            })
            .collect(),
        other => Err(MessageError::InvalidId(other.to_string())),
    }
}

/// Users of a recommendation message, in message order
///
/// # Errors
/// Fails on invalid JSON, a missing `Message`, or a user entry that is not a UUID.
#[allow(clippy::missing_inline_in_public_items, reason = "Called once per message")]
pub fn recommendation_users(body: &str) -> Result<Vec<Uuid>, MessageError> {
    let payload: UsersPayload = serde_json::from_value(inner_message(body)?)?;
    payload.users.iter().map(|user| parse_id(user)).collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FIRST: &str = "0b7f6a53-8d7c-4f55-a1a8-2f1f6b4cdd01";
    const SECOND: &str = "5c3e1b7e-0e4a-4c2e-9f58-6a1b1d9ef002";

    #[test]
    fn single_id() {
        let body = format!(r#"{{"Message": "{FIRST}"}}"#);
        assert_eq!(
            population_ids(&body).unwrap(),
            vec![Uuid::parse_str(FIRST).unwrap()]
        );
    }

    #[test]
    fn stringified_id_array() {
        let body = serde_json::json!({ "Message": format!(r#"["{FIRST}", "{SECOND}"]"#) }).to_string();
        assert_eq!(
            population_ids(&body).unwrap(),
            vec![
                Uuid::parse_str(FIRST).unwrap(),
                Uuid::parse_str(SECOND).unwrap()
            ]
        );
    }

    #[test]
    fn invalid_population_bodies() {
        assert!(matches!(
            population_ids("not json"),
            Err(MessageError::Json(_))
        ));
        assert!(matches!(
            population_ids("{}"),
            Err(MessageError::MissingMessage)
        ));
        assert!(matches!(
            population_ids(r#"{"Message": "book-1"}"#),
            Err(MessageError::InvalidId(_))
        ));
    }

    #[test]
    fn recommendation_users_from_stringified_payload() {
        let body = serde_json::json!({
            "Message": serde_json::json!({ "users": [FIRST, SECOND] }).to_string()
        })
        .to_string();
        assert_eq!(
            recommendation_users(&body).unwrap(),
            vec![
                Uuid::parse_str(FIRST).unwrap(),
                Uuid::parse_str(SECOND).unwrap()
            ]
        );
    }

    #[test]
    fn recommendation_without_users_is_empty() {
        let body = serde_json::json!({ "Message": "{}" }).to_string();
        assert!(recommendation_users(&body).unwrap().is_empty());
    }
}
