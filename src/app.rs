//! `CoreContext` — the struct the design notes call for in place of the
//! singletons the original system used: one object owning `Arc`s to every
//! component, constructed once in `main` and handed to both the HTTP layer
//! and the background engines. Shape is the teacher's
//! `skynet_gateway::app::AppState` (central state struct + `build_router`),
//! generalized from gateway/channel managers to the
//! router/agent/memory/gardener/proactive stack.

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cortex_agent::tools::execute_command::ExecuteCommandTool;
use cortex_agent::tools::list_files::ListFilesTool;
use cortex_agent::tools::read_file::ReadFileTool;
use cortex_agent::tools::search_files::SearchFilesTool;
use cortex_agent::tools::write_file::WriteFileTool;
use cortex_agent::{AgentLoop, ProgressSender, Tool};
use cortex_core::config::CortexConfig;
use cortex_core::profile::ProfileStore;
use cortex_core::{BoardSource, Clock, GoalSource, NullBoardSource, NullGoalSource, SystemClock};
use cortex_gardener::GardenerEngine;
use cortex_memory::{Embedder, FusionSummarizer, HashEmbedder, LlmFusionSummarizer, LlmRelationInferrer, LlmReranker, MemoryStore};
use cortex_providers::classifier::Tier;
use cortex_providers::ledger::{ModelPrice, PricingTable};
use cortex_providers::{ChatRequest, ChatResponse, LlmProvider, OpenAiCompatProvider, ProviderError, ProviderPool, RouterTiers, TierModel, UsageLedger};
use cortex_proactive::{ProactiveEvaluator, Triage};
use cortex_scheduler::{ScheduledItem, ScheduledItemQueue, SchedulerEngine};
use cortex_sessions::{Session, SessionStore};

use crate::error::Result;

const EMBEDDING_DIMS: usize = 64;
/// Fallback model name used wherever a background helper needs one but no
/// provider is configured yet (first-run / test mode).
const COMPRESS_MODEL_FALLBACK: &str = "trivial-compress";

pub struct CoreContext {
    pub config: CortexConfig,
    pub agent: AgentLoop,
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryStore>,
    pub profiles: Arc<ProfileStore>,
    pub scheduled_items: Arc<ScheduledItemQueue>,
    pub ledger: Arc<UsageLedger>,
    pub clock: Arc<dyn Clock>,
    pub proactive: Arc<ProactiveEvaluator>,
    fusion_summarizer: Arc<dyn FusionSummarizer>,
    session_summarizer: Arc<dyn cortex_gardener::SessionSummarizer>,
    goals: Arc<dyn GoalSource>,
    compress_model: String,
    max_context_tokens: usize,
    /// Per-session progress subscribers, registered for the lifetime of a
    /// `/ws/{session_id}` connection and drained by `process_message`.
    pub progress_subscribers: DashMap<String, ProgressSender>,
    /// Notifications queued by the scheduler's fired-item channel, polled by
    /// `/sessions/{id}/notifications`.
    pub notifications: DashMap<String, Vec<String>>,
}

impl CoreContext {
    pub fn new(config: CortexConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        ensure_parent_dir(&config.database.path)?;

        let providers = Arc::new(build_provider_pool(&config));
        let default_llm = pick_default_provider(&config);
        let (fallback_provider, fallback_model): (Arc<dyn LlmProvider>, String) = match &default_llm {
            Some((p, m)) => (p.clone(), m.clone()),
            None => (Arc::new(NoopProvider) as Arc<dyn LlmProvider>, COMPRESS_MODEL_FALLBACK.to_string()),
        };

        let pricing = build_pricing_table(&config);
        let ledger = Arc::new(UsageLedger::open(
            &sibling_db_path(&config.database.path, "ledger.db"),
            pricing,
            config.budget.daily_limit,
            config.budget.monthly_limit,
            config.budget.warning_pct,
        )?);

        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(EMBEDDING_DIMS));
        let relation_inferrer = default_llm
            .as_ref()
            .map(|(p, m)| Arc::new(LlmRelationInferrer::new(p.clone(), m.clone())) as Arc<dyn cortex_memory::RelationInferrer>);
        let reranker = default_llm
            .as_ref()
            .map(|(p, m)| Arc::new(LlmReranker::new(p.clone(), m.clone())) as Arc<dyn cortex_memory::MemoryReranker>);

        let memory = Arc::new(MemoryStore::open(
            &sibling_db_path(&config.database.path, "memory.db"),
            embedder,
            relation_inferrer,
            reranker,
            clock.clone(),
        )?);

        let sessions = Arc::new(SessionStore::open(&config.database.path, clock.clone())?);
        let profiles = Arc::new(ProfileStore::open(sibling_db_path(&config.database.path, "profiles.db"))?);
        let scheduled_items = Arc::new(ScheduledItemQueue::open(sibling_db_path(&config.database.path, "scheduler.db"))?);

        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(ExecuteCommandTool),
            Box::new(ReadFileTool),
            Box::new(WriteFileTool),
            Box::new(ListFilesTool),
            Box::new(SearchFilesTool),
        ];

        let tiers = build_router_tiers(&config);
        let agent = AgentLoop::new(
            config.agent.workspace.clone(),
            std::time::Duration::from_millis(config.agent.tool_timeout_ms),
            providers.clone(),
            tiers,
            ledger.clone(),
            memory.clone(),
            sessions.clone(),
            tools,
            clock.clone(),
        );

        let goals: Arc<dyn GoalSource> = Arc::new(NullGoalSource);
        let board: Arc<dyn BoardSource> = Arc::new(NullBoardSource);
        let triage = Triage::new(fallback_provider.clone(), fallback_model.clone());
        let proactive = Arc::new(ProactiveEvaluator::new(
            sessions.clone(),
            profiles.clone(),
            scheduled_items.clone(),
            goals.clone(),
            board,
            triage,
            config.proactive.clone(),
        ));

        let fusion_summarizer: Arc<dyn FusionSummarizer> = Arc::new(LlmFusionSummarizer::new(fallback_provider.clone(), fallback_model.clone()));
        let session_summarizer: Arc<dyn cortex_gardener::SessionSummarizer> =
            Arc::new(cortex_gardener::LlmSessionSummarizer::new(fallback_provider.clone(), fallback_model.clone()));

        if default_llm.is_none() {
            warn!("no providers configured; completions, summarization and proactive triage will fail until `providers.*` is set in cortex.toml");
        }

        Ok(Self {
            config,
            agent,
            sessions,
            memory,
            profiles,
            scheduled_items,
            ledger,
            clock,
            proactive,
            fusion_summarizer,
            session_summarizer,
            goals,
            compress_model: fallback_model,
            max_context_tokens: 8000,
            progress_subscribers: DashMap::new(),
            notifications: DashMap::new(),
        })
    }

    /// spec.md §6's `getOrCreateSession`: returns the existing session for
    /// `(user_id, channel_id)` or creates a fresh one.
    pub fn get_or_create_session(&self, user_id: &str, channel_id: &str) -> Result<Session> {
        let prefixed = format!("{channel_id}:{user_id}");
        if let Some(existing) = self.sessions.find_session_by_user_id(&prefixed)? {
            return Ok(existing);
        }
        Ok(self.sessions.create_session(user_id, channel_id, Some(prefixed))?)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.delete_session(session_id)?;
        self.progress_subscribers.remove(session_id);
        Ok(())
    }

    /// spec.md §6's `processMessage`. Progress events stream to whichever
    /// transport registered a subscriber for this session (see
    /// `http::ws`); absent one, the turn still runs, just silently.
    pub async fn process_message(&self, session_id: &str, user_id: &str, text: &str) -> Result<String> {
        let progress = self.progress_subscribers.get(session_id).map(|s| s.clone());
        let reply = self
            .agent
            .process_message(session_id, user_id, text, progress, None, &self.compress_model, self.max_context_tokens)
            .await?;
        Ok(reply)
    }

    /// Builds the gardener engine that `main` spawns as a background task.
    /// Shares this context's stores, summarizers and proactive evaluator
    /// rather than constructing a second set — there's exactly one of each
    /// per process.
    pub fn gardener_engine(self_arc: &Arc<Self>) -> GardenerEngine {
        GardenerEngine::new(
            self_arc.memory.clone(),
            self_arc.sessions.clone(),
            self_arc.profiles.clone(),
            self_arc.scheduled_items.clone(),
            self_arc.ledger.clone(),
            self_arc.goals.clone(),
            self_arc.proactive.clone(),
            self_arc.fusion_summarizer.clone(),
            self_arc.session_summarizer.clone(),
            self_arc.clock.clone(),
            self_arc.config.memory.hot_window_size,
            self_arc.config.memory.fusion_max_clusters_per_run,
            self_arc.config.memory.archival_utility_threshold,
            self_arc.config.memory.archival_min_age_days,
            self_arc.config.gardener.disable_archival,
            self_arc.config.gardener.light_tick_ms,
            self_arc.config.gardener.deep_tick_ms,
        )
    }
}

/// Registers one `LlmProvider` per configured entry. Providers are named
/// after their config key, so `router.tiers.*.models` entries of the form
/// `"<name>/<model>"` resolve back to whichever one was configured.
fn build_provider_pool(config: &CortexConfig) -> ProviderPool {
    let mut pool = ProviderPool::new();
    for (name, entry) in &config.providers {
        let base_url = entry.base_url.clone().unwrap_or_else(|| "https://api.openai.com".to_string());
        pool.register(Box::new(OpenAiCompatProvider::new(name.clone(), base_url, entry.api_key.clone())));
    }
    if config.providers.is_empty() {
        warn!("no providers configured in cortex.toml");
    }
    pool
}

/// First configured provider/model pair, used to back the fusion/session
/// summarizers and the proactive triage pass when no tier explicitly names
/// one. Returns `None` on a fresh install with nothing configured yet.
fn pick_default_provider(config: &CortexConfig) -> Option<(Arc<dyn LlmProvider>, String)> {
    let (name, entry) = config.providers.iter().next()?;
    let base_url = entry.base_url.clone().unwrap_or_else(|| "https://api.openai.com".to_string());
    let model = entry.models.first().cloned().unwrap_or_else(|| "gpt-4o-mini".to_string());
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(name.clone(), base_url, entry.api_key.clone()));
    Some((provider, model))
}

fn build_router_tiers(config: &CortexConfig) -> RouterTiers {
    let mut map = HashMap::new();
    for (tier_name, tier_cfg) in &config.router.tiers {
        let Some(tier) = parse_tier(tier_name) else {
            warn!(tier = %tier_name, "unknown router tier in config, ignoring");
            continue;
        };
        let models: Vec<TierModel> = tier_cfg.models.iter().filter_map(|spec| TierModel::parse(spec)).collect();
        map.insert(tier, models);
    }
    RouterTiers(map)
}

fn parse_tier(name: &str) -> Option<Tier> {
    match name {
        "trivial" => Some(Tier::Trivial),
        "simple" => Some(Tier::Simple),
        "moderate" => Some(Tier::Moderate),
        "complex" => Some(Tier::Complex),
        _ => None,
    }
}

/// No `pricing.*` config section exists yet and provider entries don't carry
/// per-model prices, so every model prices at zero via
/// `PricingTable::price_of`'s fallback until one is added.
fn build_pricing_table(_config: &CortexConfig) -> PricingTable {
    PricingTable(HashMap::<String, ModelPrice>::new())
}

fn sibling_db_path(primary: &str, file_name: &str) -> String {
    let path = std::path::Path::new(primary);
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name).to_string_lossy().into_owned(),
        _ => file_name.to_string(),
    }
}

fn ensure_parent_dir(db_path: &str) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Stand-in `LlmProvider` used wherever a provider-backed helper needs one
/// but no real provider is configured. Fails loudly rather than returning
/// empty output, so a misconfigured deployment sees it in logs the first
/// time a background step tries to call out.
struct NoopProvider;

#[async_trait::async_trait]
impl LlmProvider for NoopProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn complete(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
        Err(ProviderError::Unavailable("no LLM provider configured".to_string()))
    }
}

pub fn build_router(state: Arc<CoreContext>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .route("/sessions", post(crate::http::session::create_session_handler))
        .route("/sessions/{id}", delete(crate::http::session::delete_session_handler))
        .route("/sessions/{id}/notifications", get(crate::http::session::notifications_handler))
        .route("/ws/{session_id}", get(crate::http::ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Drains the scheduler's fired-item channel into `notifications`, keyed by
/// user rather than session — a fired nudge has no session of its own until
/// a transport adapter decides which one to deliver it into.
pub async fn run_notification_drain(state: Arc<CoreContext>, mut fired_rx: mpsc::Receiver<ScheduledItem>) {
    while let Some(item) = fired_rx.recv().await {
        info!(item_id = %item.id, user_id = %item.user_id, "scheduled item fired");
        state.notifications.entry(item.user_id.clone()).or_default().push(item.message.clone());
    }
}

pub fn scheduler_engine(state: &Arc<CoreContext>, fired_tx: mpsc::Sender<ScheduledItem>) -> SchedulerEngine {
    SchedulerEngine::new(state.scheduled_items.clone(), state.clock.clone(), Some(fired_tx))
}
