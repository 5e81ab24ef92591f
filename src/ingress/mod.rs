use crate::models::conversation::{
    ConversationPayload,
    EnrichedConversation,
    Message,
    Platform,
    Role,
};
use chrono::{ DateTime, SecondsFormat, Utc };
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const MAX_PAYLOAD_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngressError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        size: usize,
        limit: usize,
    },
    #[error("invalid body: {0}")]
    InvalidBody(String),
    #[error("missing required fields")]
    MissingFields,
    #[error("invalid platform '{0}'")]
    InvalidPlatform(String),
    #[error("invalid turn at index {index}")]
    InvalidTurn {
        index: usize,
    },
}

impl IngressError {
    pub fn code(&self) -> &'static str {
        match self {
            IngressError::PayloadTooLarge { .. } => "PayloadTooLarge",
            IngressError::InvalidBody(_) => "InvalidBody",
            IngressError::MissingFields => "MissingFields",
            IngressError::InvalidPlatform(_) => "InvalidPlatform",
            IngressError::InvalidTurn { .. } => "InvalidTurn",
        }
    }
}

// Loose shape of the request body. Presence and emptiness are judged by
// `validate`, so every field is optional here.
#[derive(Deserialize)]
struct IncomingConversation {
    conversation_id: Option<String>,
    platform: Option<String>,
    model: Option<String>,
    turns: Option<JsonValue>,
    captured_at: Option<String>,
    extension_version: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Checks a raw request body and returns the typed payload.
///
/// Checks run in a fixed order and the first failure is reported: size,
/// JSON shape, required fields, platform, then each turn.
pub fn validate(body: &[u8]) -> Result<ConversationPayload, IngressError> {
    if body.len() > MAX_PAYLOAD_BYTES {
        return Err(IngressError::PayloadTooLarge {
            size: body.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    let incoming: IncomingConversation = serde_json::from_slice(body)
        .map_err(|e| IngressError::InvalidBody(e.to_string()))?;

    let turns = incoming.turns
        .as_ref()
        .and_then(JsonValue::as_array)
        .filter(|t| !t.is_empty());

    let (Some(conversation_id), Some(platform), Some(turns), Some(captured_at), Some(extension_version)) = (
        present(&incoming.conversation_id),
        present(&incoming.platform),
        turns,
        present(&incoming.captured_at),
        present(&incoming.extension_version),
    ) else {
        return Err(IngressError::MissingFields);
    };

    let platform: Platform = platform
        .parse()
        .map_err(|_| IngressError::InvalidPlatform(platform.to_string()))?;

    let turns = turns
        .iter()
        .enumerate()
        .map(|(index, turn)| parse_turn(turn).ok_or(IngressError::InvalidTurn { index }))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConversationPayload {
        conversation_id: conversation_id.to_string(),
        platform,
        model: incoming.model,
        turns,
        captured_at: captured_at.to_string(),
        extension_version: extension_version.to_string(),
    })
}

fn parse_turn(turn: &JsonValue) -> Option<Message> {
    let role: Role = turn.get("role")?.as_str()?.parse().ok()?;
    let content = turn.get("content")?.as_str().filter(|c| !c.is_empty())?;
    Some(Message { role, content: content.to_string() })
}

pub fn enrich(payload: ConversationPayload, received_at: DateTime<Utc>) -> EnrichedConversation {
    let num_turns = payload.turns.len();
    EnrichedConversation {
        payload,
        server_received_at: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        num_turns,
    }
}

/// Validates the body and stamps it with the receipt time.
pub fn accept(body: &[u8]) -> Result<EnrichedConversation, IngressError> {
    validate(body).map(|payload| enrich(payload, Utc::now()))
}
