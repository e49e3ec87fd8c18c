use serde::{Deserialize, Serialize};

/// Error body returned by the backend. Different endpoints use `message` or
/// `error`, so both are optional.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ErrorResponse {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ErrorResponse {
    /// Best-effort message extraction from a raw error body
    pub fn message_from_body(body: &str, fallback: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
            if let Some(message) = parsed.message.or(parsed.error) {
                if !message.trim().is_empty() {
                    return message;
                }
            }
        }

        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed.starts_with('{') {
            fallback.to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_field_preferred() {
        let body = r#"{"message":"Invalid credentials","error":"Unauthorized"}"#;
        assert_eq!(ErrorResponse::message_from_body(body, "401"), "Invalid credentials");
    }

    #[test]
    fn test_error_field_used_when_no_message() {
        let body = r#"{"code":404,"error":"Squad not found"}"#;
        assert_eq!(ErrorResponse::message_from_body(body, "404"), "Squad not found");
    }

    #[test]
    fn test_plain_text_and_empty_bodies() {
        assert_eq!(ErrorResponse::message_from_body("Bad Gateway", "502"), "Bad Gateway");
        assert_eq!(ErrorResponse::message_from_body("", "Internal Server Error"), "Internal Server Error");
        assert_eq!(ErrorResponse::message_from_body("{}", "Forbidden"), "Forbidden");
    }
}
