use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadReason {
    RequestTimeout,
    EntityTooLarge,
    ConnectionAborted,
    ServiceUnavailable,
}

impl OverloadReason {
    pub fn as_str(self) -> &'static str {
        match self {
            OverloadReason::RequestTimeout => "request timeout",
            OverloadReason::EntityTooLarge => "request entity too large",
            OverloadReason::ConnectionAborted => "connection aborted",
            OverloadReason::ServiceUnavailable => "service unavailable",
        }
    }

    fn from_status(code: u64) -> Option<Self> {
        match code {
            408 | 504 => Some(OverloadReason::RequestTimeout),
            413 => Some(OverloadReason::EntityTooLarge),
            503 => Some(OverloadReason::ServiceUnavailable),
            _ => None,
        }
    }

    fn detect(text: &str) -> Option<Self> {
        const MARKERS: [(&str, OverloadReason); 4] = [
            ("Request Timeout", OverloadReason::RequestTimeout),
            ("413 Request Entity Too Large", OverloadReason::EntityTooLarge),
            ("Connection aborted.", OverloadReason::ConnectionAborted),
            (
                "service failure - try again later",
                OverloadReason::ServiceUnavailable,
            ),
        ];
        MARKERS
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|(_, reason)| *reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    pub submitter_id: Option<String>,
    pub id: Option<String>,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl EntityOutcome {
    pub fn first_error(&self) -> String {
        self.errors
            .first()
            .cloned()
            .unwrap_or_else(|| "invalid entity".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionReply {
    Overload {
        reason: OverloadReason,
    },
    Success {
        entities: Vec<EntityOutcome>,
    },
    ClientError {
        code: u16,
        entities: Vec<EntityOutcome>,
    },
    ServerError {
        code: u16,
    },
    Message {
        message: String,
        transactional_errors: Option<Value>,
    },
    Unrecognized,
}

impl SubmissionReply {
    pub fn connection_aborted() -> Self {
        SubmissionReply::Overload {
            reason: OverloadReason::ConnectionAborted,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmissionReply::Overload { .. } => "overload",
            SubmissionReply::Success { .. } => "success",
            SubmissionReply::ClientError { .. } => "client_error",
            SubmissionReply::ServerError { .. } => "server_error",
            SubmissionReply::Message { .. } => "message",
            SubmissionReply::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    unique_keys: Vec<RawUniqueKey>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    errors: Vec<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawUniqueKey {
    #[serde(default)]
    submitter_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
}

impl From<RawEntity> for EntityOutcome {
    fn from(raw: RawEntity) -> Self {
        Self {
            submitter_id: raw
                .unique_keys
                .into_iter()
                .next()
                .and_then(|key| key.submitter_id),
            id: raw.id,
            valid: raw.valid,
            errors: raw.errors.into_iter().filter_map(|err| err.message).collect(),
        }
    }
}

/// Classifies the raw body of a submission or deletion reply.
pub fn parse_reply(raw: &str) -> SubmissionReply {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw.trim()) else {
        return match OverloadReason::detect(raw) {
            Some(reason) => SubmissionReply::Overload { reason },
            None => SubmissionReply::Unrecognized,
        };
    };

    let entities = || -> Vec<EntityOutcome> {
        object
            .get("entities")
            .cloned()
            .and_then(|value| serde_json::from_value::<Vec<RawEntity>>(value).ok())
            .unwrap_or_default()
            .into_iter()
            .map(EntityOutcome::from)
            .collect()
    };

    if let Some(code) = object.get("code").and_then(Value::as_u64) {
        if let Some(reason) = OverloadReason::from_status(code) {
            return SubmissionReply::Overload { reason };
        }
        let code16 = u16::try_from(code).unwrap_or(u16::MAX);
        return match code {
            200 => SubmissionReply::Success {
                entities: entities(),
            },
            400 | 403 | 404 => SubmissionReply::ClientError {
                code: code16,
                entities: entities(),
            },
            500..=599 => SubmissionReply::ServerError { code: code16 },
            _ => SubmissionReply::Unrecognized,
        };
    }

    if let Some(success) = object.get("success").and_then(Value::as_bool) {
        return if success {
            SubmissionReply::Success {
                entities: entities(),
            }
        } else {
            SubmissionReply::ClientError {
                code: 400,
                entities: entities(),
            }
        };
    }

    if let Some(message) = object.get("message").and_then(Value::as_str) {
        if let Some(reason) = OverloadReason::detect(message) {
            return SubmissionReply::Overload { reason };
        }
        return SubmissionReply::Message {
            message: message.to_string(),
            transactional_errors: object.get("transactional_errors").cloned(),
        };
    }

    SubmissionReply::Unrecognized
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn plain_text_timeout_is_overload() {
        let reply = parse_reply("<html><title>504 Gateway Request Timeout</title></html>");
        assert_eq!(
            reply,
            SubmissionReply::Overload {
                reason: OverloadReason::RequestTimeout
            }
        );
        assert_matches!(
            parse_reply("<h1>413 Request Entity Too Large</h1>"),
            SubmissionReply::Overload {
                reason: OverloadReason::EntityTooLarge
            }
        );
    }

    #[test]
    fn success_entities_carry_submitter_ids() {
        let raw = r#"{"code":200,"entities":[{"id":"u1","valid":true,"unique_keys":[{"project_id":"DEV-test","submitter_id":"case-1"}]}]}"#;
        let reply = parse_reply(raw);
        assert_matches!(reply, SubmissionReply::Success { entities } => {
            assert_eq!(entities.len(), 1);
            assert_eq!(entities[0].submitter_id.as_deref(), Some("case-1"));
            assert_eq!(entities[0].id.as_deref(), Some("u1"));
        });
    }

    #[test]
    fn client_error_keeps_validity_and_messages() {
        let raw = r#"{"code":400,"entities":[
            {"valid":true,"unique_keys":[{"submitter_id":"a"}],"errors":[]},
            {"valid":false,"unique_keys":[{"submitter_id":"b"}],"errors":[{"message":"bad enum"}]}
        ]}"#;
        assert_matches!(parse_reply(raw), SubmissionReply::ClientError { code: 400, entities } => {
            assert!(entities[0].valid);
            assert!(!entities[1].valid);
            assert_eq!(entities[1].first_error(), "bad enum");
        });
    }

    #[test]
    fn server_error_and_unknown_shapes() {
        assert_matches!(
            parse_reply(r#"{"code":500,"message":"internal"}"#),
            SubmissionReply::ServerError { code: 500 }
        );
        assert_matches!(parse_reply("not json at all"), SubmissionReply::Unrecognized);
        assert_matches!(parse_reply(r#"{"code":302}"#), SubmissionReply::Unrecognized);
        assert_matches!(
            parse_reply(r#"{"code":201,"entities":[{"id":"u1","valid":true}]}"#),
            SubmissionReply::Unrecognized
        );
        assert_matches!(parse_reply(r#"[1,2,3]"#), SubmissionReply::Unrecognized);
    }

    #[test]
    fn message_without_code() {
        let raw = r#"{"message":"transaction failed","transactional_errors":["dup"]}"#;
        assert_matches!(parse_reply(raw), SubmissionReply::Message { message, transactional_errors } => {
            assert_eq!(message, "transaction failed");
            assert!(transactional_errors.is_some());
        });
    }

    #[test]
    fn delete_style_reply_uses_success_flag() {
        let raw = r#"{"success":false,"entities":[{"id":"u1","valid":true},{"id":"u2","valid":false,"errors":[{"message":"has children"}]}]}"#;
        assert_matches!(parse_reply(raw), SubmissionReply::ClientError { entities, .. } => {
            assert_eq!(entities[1].id.as_deref(), Some("u2"));
        });
    }
}
