use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub status: String,
    pub conversation_id: String,
}

impl Accepted {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self { status: "accepted".to_string(), conversation_id: conversation_id.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
