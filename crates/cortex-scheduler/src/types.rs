use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who originated a scheduled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledItemSource {
    User,
    Agent,
    Cron,
    Proactive,
}

impl std::fmt::Display for ScheduledItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduledItemSource::User => "user",
            ScheduledItemSource::Agent => "agent",
            ScheduledItemSource::Cron => "cron",
            ScheduledItemSource::Proactive => "proactive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduledItemSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "cron" => Ok(Self::Cron),
            "proactive" => Ok(Self::Proactive),
            other => Err(format!("unknown scheduled item source: {other}")),
        }
    }
}

/// The broad class of scheduled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledItemKind {
    Reminder,
    Nudge,
    Cron,
}

impl std::fmt::Display for ScheduledItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduledItemKind::Reminder => "reminder",
            ScheduledItemKind::Nudge => "nudge",
            ScheduledItemKind::Cron => "cron",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduledItemKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(Self::Reminder),
            "nudge" => Ok(Self::Nudge),
            "cron" => Ok(Self::Cron),
            other => Err(format!("unknown scheduled item kind: {other}")),
        }
    }
}

/// Lifecycle state of a scheduled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledItemStatus {
    Pending,
    Fired,
    Acted,
    Dismissed,
    Expired,
}

impl std::fmt::Display for ScheduledItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduledItemStatus::Pending => "pending",
            ScheduledItemStatus::Fired => "fired",
            ScheduledItemStatus::Acted => "acted",
            ScheduledItemStatus::Dismissed => "dismissed",
            ScheduledItemStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduledItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fired" => Ok(Self::Fired),
            "acted" => Ok(Self::Acted),
            "dismissed" => Ok(Self::Dismissed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown scheduled item status: {other}")),
        }
    }
}

/// Recurrence rule for an item that should re-enqueue itself after firing.
/// Cron expressions are accepted for forward compatibility but, matching the
/// upstream job engine this is adapted from, are not parsed yet — a recurring
/// item with a `Cron` rule fires once and is not rescheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    Interval { every_secs: u64 },
    Daily { hour: u8, minute: u8 },
    Weekly { day: u8, hour: u8, minute: u8 },
    Cron { expression: String },
}

/// A single entry in the durable scheduled-item queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub trigger_at: DateTime<Utc>,
    pub source: ScheduledItemSource,
    pub kind: ScheduledItemKind,
    /// Free-form sub-classification within `kind`, e.g. `"goal_checkin"` or
    /// `"unresolved_thread"` for a `Nudge`.
    pub item_type: String,
    pub status: ScheduledItemStatus,
    pub session_id: Option<String>,
    pub context: Option<Value>,
    pub recurring: Option<RecurrenceRule>,
    pub source_memory_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

/// Fields supplied by a caller enqueuing a new item; the queue fills in
/// `id`, `status`, and `created_at`.
pub struct NewScheduledItem {
    pub user_id: String,
    pub message: String,
    pub trigger_at: DateTime<Utc>,
    pub source: ScheduledItemSource,
    pub kind: ScheduledItemKind,
    pub item_type: String,
    pub session_id: Option<String>,
    pub context: Option<Value>,
    pub recurring: Option<RecurrenceRule>,
    pub source_memory_id: Option<String>,
}
