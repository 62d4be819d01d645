use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Preference,
    Fact,
    Event,
    Relationship,
    Insight,
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Relationship => "relationship",
            Self::Insight => "insight",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MemoryCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "event" => Ok(Self::Event),
            "relationship" => Ok(Self::Relationship),
            "insight" => Ok(Self::Insight),
            other => Err(format!("unknown memory category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Regular,
    StaticProfile,
    Derived,
    Superseded,
    Archived,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Regular => "regular",
            Self::StaticProfile => "static_profile",
            Self::Derived => "derived",
            Self::Superseded => "superseded",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MemoryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(Self::Regular),
            "static_profile" => Ok(Self::StaticProfile),
            "derived" => Ok(Self::Derived),
            "superseded" => Ok(Self::Superseded),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Updates,
    Extends,
    Derives,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Updates => "updates",
            Self::Extends => "extends",
            Self::Derives => "derives",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RelationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updates" => Ok(Self::Updates),
            "extends" => Ok(Self::Extends),
            "derives" => Ok(Self::Derives),
            other => Err(format!("unknown relation type: {other}")),
        }
    }
}

/// An immutable memory record. Mutable fields after creation are limited to
/// `prominence`, `last_accessed`, `access_count`, `is_latest`, and the
/// `memory_type` transition to `Superseded`/`Archived` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub memory_type: MemoryType,
    pub importance: u8,
    pub confidence: f64,
    pub prominence: f64,
    pub is_latest: bool,
    pub source: String,
    pub document_date: DateTime<Utc>,
    pub event_date: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: u32,
    pub embedding: Option<Vec<f32>>,
    pub source_chunk: Option<String>,
    pub learned_from: String,
    pub times_confirmed: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A search hit plus the related memories discovered by graph activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    pub score: f64,
    pub related: Vec<Memory>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RerankCandidate<'a> {
    pub index: usize,
    pub content: &'a str,
    pub original_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RerankScore {
    pub index: usize,
    pub score: f64,
}
