pub mod db;
pub mod engine;
pub mod error;
pub mod manager;
pub mod recurrence;
pub mod types;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use manager::{ScheduledItemQueue, DEFAULT_SEND_WINDOW, SIMILARITY_THRESHOLD};
pub use types::{
    NewScheduledItem, RecurrenceRule, ScheduledItem, ScheduledItemKind, ScheduledItemSource, ScheduledItemStatus,
};
