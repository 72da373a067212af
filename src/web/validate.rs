use serde_json::Value;

use crate::config::{MAX_TOKENS_RANGE, TEMPERATURE_RANGE};
use crate::web::models::{ChatRequest, Role};

/// First constraint an inbound chat body violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Request body must be valid JSON.")]
    InvalidJson,

    #[error("Messages array is required and must not be empty.")]
    MissingMessages,

    #[error("Each message must have a valid role and non-empty content.")]
    MalformedMessage,

    #[error("Request must include at least one user or assistant message.")]
    NoConversation,

    #[error("Field '{0}' has an invalid type.")]
    InvalidField(String),

    #[error("Temperature must be between 0 and 2.")]
    TemperatureOutOfRange,

    #[error("max_tokens must be between 1 and 4096.")]
    MaxTokensOutOfRange,
}

/// Check a candidate chat body. Rules run in a fixed order and the first
/// failure is returned.
pub fn validate(body: &Value) -> Result<(), ValidationError> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .filter(|messages| !messages.is_empty())
        .ok_or(ValidationError::MissingMessages)?;

    if !messages.iter().all(is_well_formed_message) {
        return Err(ValidationError::MalformedMessage);
    }

    // System messages are replaced by the server's own prompt.
    let is_system = |m: &Value| {
        m.get("role").and_then(Value::as_str).and_then(Role::parse) == Some(Role::System)
    };
    if messages.iter().all(is_system) {
        return Err(ValidationError::NoConversation);
    }

    if let Some(temperature) = present(body, "temperature") {
        let in_range = temperature
            .as_f64()
            .is_some_and(|t| TEMPERATURE_RANGE.contains(&t));
        if !in_range {
            return Err(ValidationError::TemperatureOutOfRange);
        }
    }

    if let Some(max_tokens) = present(body, "max_tokens") {
        let in_range = max_tokens
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .is_some_and(|n| MAX_TOKENS_RANGE.contains(&n));
        if !in_range {
            return Err(ValidationError::MaxTokensOutOfRange);
        }
    }

    if let Some(model) = present(body, "model") {
        if !model.as_str().is_some_and(|m| !m.trim().is_empty()) {
            return Err(ValidationError::InvalidField("model".into()));
        }
    }

    if let Some(stream) = present(body, "stream") {
        if !stream.is_boolean() {
            return Err(ValidationError::InvalidField("stream".into()));
        }
    }

    Ok(())
}

/// Validate raw bytes and turn them into a typed request.
pub fn parse_chat_request(raw: &[u8]) -> Result<ChatRequest, ValidationError> {
    let body: Value = serde_json::from_slice(raw).map_err(|_| ValidationError::InvalidJson)?;
    validate(&body)?;
    serde_json::from_value(body).map_err(|e| ValidationError::InvalidField(e.to_string()))
}

fn present<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get(key).filter(|v| !v.is_null())
}

fn is_well_formed_message(message: &Value) -> bool {
    let role = message.get("role").and_then(Value::as_str).unwrap_or_default();
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Role::parse(role).is_some() && !content.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(content: &str) -> Value {
        json!({ "role": "user", "content": content })
    }

    #[test]
    fn accepts_minimal_request() {
        assert_eq!(validate(&json!({ "messages": [user("hello")] })), Ok(()));
    }

    #[test]
    fn missing_or_empty_messages() {
        for body in [
            json!({}),
            json!({ "messages": [] }),
            json!({ "messages": "hello" }),
            json!({ "messages": null }),
            json!([user("not an object")]),
        ] {
            assert_eq!(validate(&body), Err(ValidationError::MissingMessages), "{body}");
        }
    }

    #[test]
    fn malformed_messages() {
        for message in [
            json!({ "role": "user" }),
            json!({ "role": "", "content": "hi" }),
            json!({ "role": "user", "content": "" }),
            json!({ "role": "robot", "content": "hi" }),
            json!({ "role": "user", "content": 42 }),
            json!("hi"),
        ] {
            let body = json!({ "messages": [user("ok"), message] });
            assert_eq!(validate(&body), Err(ValidationError::MalformedMessage), "{body}");
        }
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        for t in [0.0, 1.0, 2.0] {
            let body = json!({ "messages": [user("hi")], "temperature": t });
            assert_eq!(validate(&body), Ok(()));
        }
        for t in [json!(-0.1), json!(2.01), json!(3), json!("warm")] {
            let body = json!({ "messages": [user("hi")], "temperature": t });
            assert_eq!(validate(&body), Err(ValidationError::TemperatureOutOfRange));
        }
    }

    #[test]
    fn max_tokens_bounds_are_inclusive() {
        for n in [1, 4096] {
            let body = json!({ "messages": [user("hi")], "max_tokens": n });
            assert_eq!(validate(&body), Ok(()));
        }
        for n in [json!(0), json!(4097), json!(-5), json!(12.5)] {
            let body = json!({ "messages": [user("hi")], "max_tokens": n });
            assert_eq!(validate(&body), Err(ValidationError::MaxTokensOutOfRange));
        }
    }

    #[test]
    fn first_failure_wins() {
        let body = json!({ "messages": [], "temperature": 3, "max_tokens": 0 });
        assert_eq!(validate(&body), Err(ValidationError::MissingMessages));

        let body = json!({ "messages": [{ "role": "user" }], "temperature": 3 });
        assert_eq!(validate(&body), Err(ValidationError::MalformedMessage));

        let body = json!({ "messages": [user("hi")], "temperature": 3, "max_tokens": 0 });
        assert_eq!(validate(&body), Err(ValidationError::TemperatureOutOfRange));
    }

    #[test]
    fn system_only_conversation_is_rejected() {
        let system = json!({ "role": "system", "content": "be terse" });
        let body = json!({ "messages": [system.clone()] });
        assert_eq!(validate(&body), Err(ValidationError::NoConversation));

        let body = json!({ "messages": [system, user("hi")] });
        assert_eq!(validate(&body), Ok(()));
    }

    #[test]
    fn optional_fields_must_have_the_right_type() {
        let body = json!({ "messages": [user("hi")], "stream": "yes" });
        assert_eq!(validate(&body), Err(ValidationError::InvalidField("stream".into())));

        let body = json!({ "messages": [user("hi")], "model": 5 });
        assert_eq!(validate(&body), Err(ValidationError::InvalidField("model".into())));

        let body = json!({ "messages": [user("hi")], "model": null, "stream": null });
        assert_eq!(validate(&body), Ok(()));

        let err = parse_chat_request(br#"{"messages":[{"role":"user","content":"hi"}],"stream":"yes"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Field 'stream' has an invalid type.");
    }

    #[test]
    fn parse_rejects_non_json() {
        assert_eq!(
            parse_chat_request(b"not json").unwrap_err(),
            ValidationError::InvalidJson
        );
    }

    #[test]
    fn parse_fills_typed_request() {
        let raw = br#"{"messages":[{"role":"user","content":"hi"}],"temperature":0.2,"stream":true}"#;
        let request = parse_chat_request(raw).unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, None);
        assert!(request.stream);
    }
}
