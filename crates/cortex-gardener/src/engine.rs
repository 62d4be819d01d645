//! Tick driver. Same `tokio::select!`-over-interval-and-shutdown-watch shape
//! as `cortex_scheduler::engine::SchedulerEngine::run`, generalized to two
//! independent intervals (light and deep) instead of one.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cortex_core::{Clock, GoalSource, ProfileStore};
use cortex_memory::{FusionSummarizer, MemoryStore};
use cortex_proactive::ProactiveEvaluator;
use cortex_providers::UsageLedger;
use cortex_scheduler::ScheduledItemQueue;
use cortex_sessions::SessionStore;

use crate::steps::SessionSummarizer;
use crate::types::{DeepTickReport, StepOutcome};
use crate::{behavioral, light_tick, steps};

/// Sessions flagged `metadata.sub_agent == true` older than this are pruned
/// by step 9, well ahead of step 4(c)'s blanket 30-day session hard-prune.
const SUB_AGENT_MAX_AGE_DAYS: i64 = 3;
const SESSION_SUMMARIZATION_MIN_AGE_DAYS: i64 = 1;

pub struct GardenerEngine {
    memory: Arc<MemoryStore>,
    sessions: Arc<SessionStore>,
    profiles: Arc<ProfileStore>,
    scheduled_items: Arc<ScheduledItemQueue>,
    ledger: Arc<UsageLedger>,
    goals: Arc<dyn GoalSource>,
    proactive: Arc<ProactiveEvaluator>,
    fusion_summarizer: Arc<dyn FusionSummarizer>,
    session_summarizer: Arc<dyn SessionSummarizer>,
    clock: Arc<dyn Clock>,

    hot_window_size: usize,
    fusion_max_clusters: usize,
    archival_utility_threshold: f64,
    archival_min_age_days: i64,
    disable_archival: bool,
    light_tick_interval: StdDuration,
    deep_tick_interval: StdDuration,
}

#[allow(clippy::too_many_arguments)]
impl GardenerEngine {
    pub fn new(
        memory: Arc<MemoryStore>,
        sessions: Arc<SessionStore>,
        profiles: Arc<ProfileStore>,
        scheduled_items: Arc<ScheduledItemQueue>,
        ledger: Arc<UsageLedger>,
        goals: Arc<dyn GoalSource>,
        proactive: Arc<ProactiveEvaluator>,
        fusion_summarizer: Arc<dyn FusionSummarizer>,
        session_summarizer: Arc<dyn SessionSummarizer>,
        clock: Arc<dyn Clock>,
        hot_window_size: usize,
        fusion_max_clusters: usize,
        archival_utility_threshold: f64,
        archival_min_age_days: i64,
        disable_archival: bool,
        light_tick_ms: u64,
        deep_tick_ms: u64,
    ) -> Self {
        Self {
            memory,
            sessions,
            profiles,
            scheduled_items,
            ledger,
            goals,
            proactive,
            fusion_summarizer,
            session_summarizer,
            clock,
            hot_window_size,
            fusion_max_clusters,
            archival_utility_threshold,
            archival_min_age_days,
            disable_archival,
            light_tick_interval: StdDuration::from_millis(light_tick_ms),
            deep_tick_interval: StdDuration::from_millis(deep_tick_ms),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("gardener started");

        let mut light = tokio::time::interval(self.light_tick_interval);
        let mut deep = tokio::time::interval(self.deep_tick_interval);

        loop {
            tokio::select! {
                _ = light.tick() => {
                    let report = light_tick::run(&self.memory, &self.sessions, &self.ledger, self.hot_window_size, self.clock.now());
                    if !report.hot_decayed.is_ok() || !report.stuck_sessions_timed_out.is_ok() {
                        warn!(?report, "light tick completed with failures");
                    } else {
                        info!(?report, "light tick completed");
                    }
                }
                _ = deep.tick() => {
                    let report = self.deep_tick().await;
                    let failed = report.failed_steps();
                    if failed.is_empty() {
                        info!("deep tick completed, all steps ok");
                    } else {
                        error!(?failed, "deep tick completed with failing steps");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("gardener shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn deep_tick(&self) -> DeepTickReport {
        let now = self.clock.now();

        let full_decay = steps::full_decay(&self.memory);
        let fusion = steps::fusion(&self.memory, self.fusion_summarizer.as_ref(), self.fusion_max_clusters).await;
        let session_summarization = steps::session_summarization(
            &self.sessions,
            self.session_summarizer.as_ref(),
            SESSION_SUMMARIZATION_MIN_AGE_DAYS,
        )
        .await;
        let enhanced_forgetting = steps::enhanced_forgetting(
            &self.memory,
            &self.sessions,
            self.archival_utility_threshold,
            self.archival_min_age_days,
            self.disable_archival,
        );

        let behavioral_inference = match behavioral::run_for_all_users(&self.sessions, &self.profiles, now) {
            Ok(n) => StepOutcome::ok(format!("updated={n}")),
            Err(e) => StepOutcome::failed(e),
        };
        let trust_score_update = behavioral::reconcile_trust_scores(&self.profiles);

        let user_ids = self.sessions.all_user_ids().unwrap_or_default();

        let mut goal_checks_ok = 0u32;
        let mut goal_checks_failed = 0u32;
        for user_id in &user_ids {
            match steps::goal_deadline_check(self.goals.as_ref(), &self.scheduled_items, user_id, now) {
                StepOutcome::Ok { .. } => goal_checks_ok += 1,
                StepOutcome::Failed { .. } => goal_checks_failed += 1,
            }
        }
        let goal_deadline_check = if goal_checks_failed == 0 {
            StepOutcome::ok(format!("users_checked={goal_checks_ok}"))
        } else {
            StepOutcome::failed(format!("{goal_checks_failed} of {} users failed goal check", user_ids.len()))
        };

        let mut nudges_scheduled = 0usize;
        let mut proactive_failed = 0u32;
        for user_id in &user_ids {
            match self.proactive.evaluate_user(user_id, now).await {
                Ok(summary) => nudges_scheduled += summary.nudges_scheduled,
                Err(_) => proactive_failed += 1,
            }
        }
        let proactive_evaluation = if proactive_failed == 0 {
            StepOutcome::ok(format!("users_evaluated={} nudges_scheduled={nudges_scheduled}", user_ids.len()))
        } else {
            StepOutcome::failed(format!("{proactive_failed} of {} users failed proactive evaluation", user_ids.len()))
        };

        let sub_agent_cleanup = steps::sub_agent_cleanup(&self.sessions, SUB_AGENT_MAX_AGE_DAYS);

        DeepTickReport {
            at: now,
            full_decay,
            fusion,
            session_summarization,
            enhanced_forgetting,
            behavioral_inference,
            trust_score_update,
            goal_deadline_check,
            proactive_evaluation,
            sub_agent_cleanup,
        }
    }
}
