use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A goal with a deadline, owned by whatever external module tracks goals.
/// Neither the gardener nor the proactive evaluator persist goals
/// themselves; both depend on [`GoalSource`] instead of a concrete store,
/// mirroring the outbound-interface idiom used for channel adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
}

/// Gardener step 7 and the proactive evaluator's signal collection both
/// need "this user's goals with deadlines"; no goal-tracking module is
/// part of the core component table, so both depend on this trait rather
/// than a concrete store. [`NullGoalSource`] is the default when nothing
/// implements it.
pub trait GoalSource: Send + Sync {
    fn active_goals_with_deadlines(&self, user_id: &str) -> Vec<Goal>;
}

pub struct NullGoalSource;

impl GoalSource for NullGoalSource {
    fn active_goals_with_deadlines(&self, _user_id: &str) -> Vec<Goal> {
        Vec::new()
    }
}

/// A stalled item on whatever board/task tracker a deployment wires in.
/// Same null-default idiom as [`GoalSource`] — owned by the proactive
/// evaluator's signal collection step, nothing in the core persists these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardItem {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub stalled_days: i64,
}

pub trait BoardSource: Send + Sync {
    fn stalled_items(&self, user_id: &str) -> Vec<BoardItem>;
}

pub struct NullBoardSource;

impl BoardSource for NullBoardSource {
    fn stalled_items(&self, _user_id: &str) -> Vec<BoardItem> {
        Vec::new()
    }
}
