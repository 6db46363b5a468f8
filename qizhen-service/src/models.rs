use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EndDialogueRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// One entry of the portal listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectLink {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub dialogue: bool,
}
