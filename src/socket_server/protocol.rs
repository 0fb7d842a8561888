//! Socket server protocol message types
//!
//! Defines the JSON message format for client-server communication. One JSON
//! object per WebSocket message. Inbound messages without a `type` are
//! treated as translation requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::context::{ContextPair, SpeakerStats, SystemStats};
use crate::error::{Result, ServerError};

/// Client-to-server message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Translate some text
    Translation(TranslationRequest),
    /// A translation whose fields failed to decode; keeps the id if it was readable
    InvalidTranslation {
        request_id: Option<String>,
        message: String,
    },
    /// Liveness check
    Ping,
    /// Server counters
    Stats,
    /// Forget a speaker's history
    ContextClear { context_id: Option<String> },
    /// Inspect a speaker's history
    ContextStats { context_id: Option<String> },
    /// Any `type` the server does not know
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct ContextTarget {
    #[serde(default)]
    context_id: Option<String>,
}

impl ClientMessage {
    /// Decode one inbound text message
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| ServerError::Protocol {
            message: format!("Invalid JSON: {}", e),
        })?;

        if !value.is_object() {
            return Err(ServerError::Protocol {
                message: "Expected a JSON object".to_string(),
            });
        }

        let kind = match value.get("type") {
            None | Some(Value::Null) => "translation".to_string(),
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => {
                return Err(ServerError::Protocol {
                    message: "Field 'type' must be a string".to_string(),
                })
            }
        };

        let invalid = |e: serde_json::Error| ServerError::Protocol {
            message: format!("Invalid {} message: {}", kind, e),
        };

        match kind.as_str() {
            "translation" => match serde_json::from_value(value.clone()) {
                Ok(request) => Ok(Self::Translation(request)),
                Err(e) => Ok(Self::InvalidTranslation {
                    request_id: readable_request_id(&value),
                    message: format!("Invalid translation message: {}", e),
                }),
            },
            "ping" => Ok(Self::Ping),
            "stats" => Ok(Self::Stats),
            "context_clear" => {
                let target: ContextTarget = serde_json::from_value(value.clone()).map_err(invalid)?;
                Ok(Self::ContextClear {
                    context_id: non_empty(target.context_id),
                })
            }
            "context_stats" => {
                let target: ContextTarget = serde_json::from_value(value.clone()).map_err(invalid)?;
                Ok(Self::ContextStats {
                    context_id: non_empty(target.context_id),
                })
            }
            _ => Ok(Self::Unknown(kind.clone())),
        }
    }
}

/// Fields of a `translation` request. Everything is optional on the wire;
/// required-field checks happen at dispatch so they can be answered with a
/// structured error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranslationRequest {
    #[serde(default, deserialize_with = "string_or_number")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub context_id: Option<String>,
    /// Advisory only
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

fn default_priority() -> String {
    "normal".to_string()
}

impl TranslationRequest {
    /// Request id, if present and not blank
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Speaker id, if present and not blank
    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Clients send ids as strings or plain numbers
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, found {}",
            other
        ))),
    }
}

/// `request_id` from a message that did not decode as a whole
fn readable_request_id(value: &Value) -> Option<String> {
    let id = match value.get("request_id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    non_empty(Some(id))
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.trim().is_empty())
}

/// Which translator entry point produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    Simple,
    Contextual,
}

/// Reply to a `translation` request. Carries no `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult {
    pub request_id: String,
    pub translated: String,
    pub translation_type: TranslationMode,
    pub context_id: Option<String>,
    pub processing_time_ms: f64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TranslationResult {
    pub fn completed(
        request_id: String,
        translated: String,
        translation_type: TranslationMode,
        context_id: Option<String>,
        processing_time_ms: f64,
    ) -> Self {
        Self {
            request_id,
            translated,
            translation_type,
            context_id,
            processing_time_ms: (processing_time_ms * 100.0).round() / 100.0,
            status: "completed".to_string(),
            message: None,
        }
    }

    /// Answer for blank input; the translator is never consulted
    pub fn empty(request_id: String, context_id: Option<String>) -> Self {
        Self {
            message: Some("empty text".to_string()),
            ..Self::completed(
                request_id,
                String::new(),
                TranslationMode::Simple,
                context_id,
                0.0,
            )
        }
    }
}

/// Server metadata sent with the connection acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub model: String,
    pub device: String,
    pub context_enabled: bool,
    pub supported_languages: BTreeMap<String, String>,
}

/// Server-to-client message with a `type` tag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connection {
        status: String,
        client_id: String,
        server_info: ServerInfo,
    },
    /// Error response
    Error {
        error: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// Pong response
    Pong {
        timestamp: f64,
        server_status: String,
    },
    /// Live server counters
    Stats {
        connected_clients: usize,
        active_requests: usize,
        translator_ready: bool,
        context_enabled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_stats: Option<SystemStats>,
    },
    /// Result of a `context_clear`
    ContextClear {
        context_id: String,
        success: bool,
        status: String,
    },
    /// Result of a `context_stats`
    ContextStats {
        context_id: String,
        found: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<SpeakerStats>,
        #[serde(skip_serializing_if = "Option::is_none")]
        buffer: Option<Vec<ContextPair>>,
    },
}

impl ServerMessage {
    pub fn error(error: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Error {
            error: error.into(),
            status: "error".to_string(),
            request_id,
        }
    }

    pub fn pong(timestamp: f64) -> Self {
        Self::Pong {
            timestamp,
            server_status: "running".to_string(),
        }
    }

    pub fn context_cleared(context_id: String, existed: bool) -> Self {
        Self::ContextClear {
            context_id,
            success: existed,
            status: if existed { "cleared" } else { "not_found" }.to_string(),
        }
    }
}

/// Anything the server writes to a socket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Result(TranslationResult),
    Message(ServerMessage),
}

impl From<TranslationResult> for Outbound {
    fn from(result: TranslationResult) -> Self {
        Self::Result(result)
    }
}

impl From<ServerMessage> for Outbound {
    fn from(message: ServerMessage) -> Self {
        Self::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_type_defaults_to_translation() {
        let msg = ClientMessage::parse(r#"{"request_id":"r1","text":"hello"}"#).unwrap();
        match msg {
            ClientMessage::Translation(req) => {
                assert_eq!(req.request_id(), Some("r1"));
                assert_eq!(req.text, "hello");
                assert_eq!(req.priority, "normal");
                assert_eq!(req.context_id(), None);
                assert_eq!(req.max_length, None);
            }
            other => panic!("Expected Translation message, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_request_id_and_options() {
        let msg = ClientMessage::parse(
            r#"{"type":"translation","request_id":42,"text":"x","context_id":"s1",
                "priority":"high","source_lang":"fra_Latn","target_lang":"eng_Latn","max_length":64}"#,
        )
        .unwrap();
        let ClientMessage::Translation(req) = msg else {
            panic!("Expected Translation message");
        };
        assert_eq!(req.request_id(), Some("42"));
        assert_eq!(req.context_id(), Some("s1"));
        assert_eq!(req.priority, "high");
        assert_eq!(req.source_lang.as_deref(), Some("fra_Latn"));
        assert_eq!(req.max_length, Some(64));
    }

    #[test]
    fn test_blank_ids_are_absent() {
        let ClientMessage::Translation(req) =
            ClientMessage::parse(r#"{"request_id":"  ","text":"x","context_id":""}"#).unwrap()
        else {
            panic!("Expected Translation message");
        };
        assert_eq!(req.request_id(), None);
        assert_eq!(req.context_id(), None);

        let msg = ClientMessage::parse(r#"{"type":"context_clear","context_id":""}"#).unwrap();
        assert_eq!(msg, ClientMessage::ContextClear { context_id: None });
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert_eq!(ClientMessage::parse(r#"{"type":"stats"}"#).unwrap(), ClientMessage::Stats);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"context_stats","context_id":"s1"}"#).unwrap(),
            ClientMessage::ContextStats {
                context_id: Some("s1".to_string())
            }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe"}"#).unwrap(),
            ClientMessage::Unknown("subscribe".to_string())
        );
    }

    #[test]
    fn test_malformed_messages_are_protocol_errors() {
        for input in ["not json", "[1,2]", r#"{"type":7}"#, r#"{"type":"context_stats","context_id":3}"#] {
            match ClientMessage::parse(input) {
                Err(ServerError::Protocol { .. }) => {}
                other => panic!("Expected protocol error for {}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_bad_translation_fields_keep_request_id() {
        let msg = ClientMessage::parse(r#"{"request_id":"r1","text":null}"#).unwrap();
        let ClientMessage::InvalidTranslation { request_id, message } = msg else {
            panic!("Expected InvalidTranslation, got {:?}", msg);
        };
        assert_eq!(request_id.as_deref(), Some("r1"));
        assert!(message.starts_with("Invalid translation message"));

        let msg = ClientMessage::parse(r#"{"request_id":5,"text":"x","max_length":-5}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::InvalidTranslation { request_id: Some(ref id), .. } if id == "5"
        ));

        let msg = ClientMessage::parse(r#"{"request_id":{"a":1},"text":"x"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::InvalidTranslation { request_id: None, .. }
        ));
    }

    #[test]
    fn test_translation_result_shape() {
        let result = TranslationResult::completed(
            "r1".to_string(),
            "こんにちは".to_string(),
            TranslationMode::Contextual,
            Some("s1".to_string()),
            12.3456,
        );
        let json = serde_json::to_value(Outbound::from(result)).unwrap();
        assert_eq!(
            json,
            json!({
                "request_id": "r1",
                "translated": "こんにちは",
                "translation_type": "contextual",
                "context_id": "s1",
                "processing_time_ms": 12.35,
                "status": "completed"
            })
        );
    }

    #[test]
    fn test_empty_result_shape() {
        let json = serde_json::to_value(TranslationResult::empty("r1".to_string(), None)).unwrap();
        assert_eq!(json["translated"], "");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["translation_type"], "simple");
        assert_eq!(json["context_id"], Value::Null);
        assert_eq!(json["message"], "empty text");
    }

    #[test]
    fn test_server_message_shapes() {
        let json = serde_json::to_value(ServerMessage::error("boom", None)).unwrap();
        assert_eq!(json, json!({"type": "error", "error": "boom", "status": "error"}));

        let json =
            serde_json::to_value(ServerMessage::error("boom", Some("r9".to_string()))).unwrap();
        assert_eq!(json["request_id"], "r9");

        let json = serde_json::to_value(ServerMessage::context_cleared("s1".to_string(), false))
            .unwrap();
        assert_eq!(
            json,
            json!({"type": "context_clear", "context_id": "s1", "success": false, "status": "not_found"})
        );

        let json = serde_json::to_value(ServerMessage::pong(1.5)).unwrap();
        assert_eq!(json, json!({"type": "pong", "timestamp": 1.5, "server_status": "running"}));

        let json = serde_json::to_value(ServerMessage::Stats {
            connected_clients: 2,
            active_requests: 1,
            translator_ready: true,
            context_enabled: false,
            context_stats: None,
        })
        .unwrap();
        assert_eq!(json["type"], "stats");
        assert!(json.get("context_stats").is_none());
    }
}
