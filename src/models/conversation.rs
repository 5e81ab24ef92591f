use serde::{ Serialize, Deserialize };
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

/// Chat provider a conversation was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    ChatGpt,
    Claude,
    Grok,
    Gemini,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Platform::ChatGpt, Platform::Claude, Platform::Grok, Platform::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "chatgpt",
            Platform::Claude => "claude",
            Platform::Grok => "grok",
            Platform::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("platform", s))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnumError {
    message: String,
}

impl ParseEnumError {
    fn new(kind: &str, value: &str) -> Self {
        Self { message: format!("Invalid {}: '{}'", kind, value) }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseEnumError {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A conversation as captured by the extension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub conversation_id: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub turns: Vec<Message>,
    pub captured_at: String,
    pub extension_version: String,
}

/// The unit appended to the shared log. Built once at ingress, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedConversation {
    #[serde(flatten)]
    pub payload: ConversationPayload,
    pub server_received_at: String,
    pub num_turns: usize,
}

impl EnrichedConversation {
    pub fn conversation_id(&self) -> &str {
        &self.payload.conversation_id
    }

    /// One JSON Lines record, newline included.
    pub fn to_log_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EnrichedConversation {
        EnrichedConversation {
            payload: ConversationPayload {
                conversation_id: "abc".into(),
                platform: Platform::Claude,
                model: None,
                turns: vec![
                    Message { role: Role::User, content: "hi".into() },
                    Message { role: Role::Assistant, content: "hello".into() },
                ],
                captured_at: "2026-01-01T00:00:00Z".into(),
                extension_version: "1.0.0".into(),
            },
            server_received_at: "2026-01-01T00:00:01.000Z".into(),
            num_turns: 2,
        }
    }

    #[test]
    fn test_log_line_field_order_and_terminator() {
        let line = sample().to_log_line().unwrap();
        assert_eq!(
            line,
            "{\"conversation_id\":\"abc\",\"platform\":\"claude\",\"turns\":[{\"role\":\"user\",\"content\":\"hi\"},{\"role\":\"assistant\",\"content\":\"hello\"}],\"captured_at\":\"2026-01-01T00:00:00Z\",\"extension_version\":\"1.0.0\",\"server_received_at\":\"2026-01-01T00:00:01.000Z\",\"num_turns\":2}\n"
        );
    }

    #[test]
    fn test_model_is_serialized_when_present() {
        let mut record = sample();
        record.payload.model = Some("claude-sonnet".into());
        let line = record.to_log_line().unwrap();
        assert!(line.contains("\"model\":\"claude-sonnet\",\"turns\""));
    }

    #[test]
    fn test_platform_parsing() {
        assert_eq!("chatgpt".parse::<Platform>(), Ok(Platform::ChatGpt));
        assert_eq!("gemini".parse::<Platform>(), Ok(Platform::Gemini));
        assert!("bard".parse::<Platform>().is_err());
        assert!("Claude".parse::<Platform>().is_err());
    }

    #[test]
    fn test_enriched_line_parses_back() {
        let record = sample();
        let line = record.to_log_line().unwrap();
        let parsed: EnrichedConversation = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, record);
    }
}
