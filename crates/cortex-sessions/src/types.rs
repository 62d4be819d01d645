use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cortex_providers::ContentBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// One turn in a session's append-only message log. `id` is a
/// monotonically increasing row id used as the pagination cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: i64,
    pub session_id: String,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub created_at: DateTime<Utc>,
}

impl SessionMessage {
    /// Concatenated text blocks, ignoring tool blocks. Mirrors
    /// `cortex_providers::Message::text`.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A durable conversation session. Messages live in a sibling table and are
/// fetched via `getSessionMessagesPaginated`, not embedded on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// A page of messages plus the cursor to request the next page with
/// (`before` on the next call), or `None` when there's nothing older.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<SessionMessage>,
    pub next_before: Option<i64>,
}

/// A gardener-produced condensation of a session's conversation (spec.md
/// §4.9 step 3). Only the gardener writes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}
