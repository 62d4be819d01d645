use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level config (cortex.toml + CORTEX_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CortexConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntryConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub gardener: GardenerConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// `providers.<name> = { api_key, base_url?, models = [...] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntryConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

/// `router.tiers.<tier>.models = ["provider/model", ...]`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub tiers: HashMap<String, TierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TierConfig {
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    pub daily_limit: Option<f64>,
    pub monthly_limit: Option<f64>,
    #[serde(default = "default_warning_pct")]
    pub warning_pct: f64,
}

fn default_warning_pct() -> f64 {
    0.75
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_session_dir")]
    pub session_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_ms: default_tool_timeout_ms(),
            workspace: default_workspace(),
            session_dir: default_session_dir(),
        }
    }
}

fn default_max_iterations() -> u32 {
    20
}
fn default_tool_timeout_ms() -> u64 {
    120_000
}
fn default_workspace() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/workspace", home)
}
fn default_session_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/sessions", home)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_embedder_name")]
    pub embedder_name: String,
    #[serde(default = "default_hot_window_size")]
    pub hot_window_size: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_rerank_max_candidates")]
    pub rerank_max_candidates: usize,
    #[serde(default = "default_decay_half_life_days")]
    pub decay_half_life_days: f64,
    #[serde(default = "default_fusion_max_clusters")]
    pub fusion_max_clusters_per_run: usize,
    #[serde(default = "default_archival_utility_threshold")]
    pub archival_utility_threshold: f64,
    #[serde(default = "default_archival_min_age_days")]
    pub archival_min_age_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedder_name: default_embedder_name(),
            hot_window_size: default_hot_window_size(),
            max_context_tokens: default_max_context_tokens(),
            rerank_max_candidates: default_rerank_max_candidates(),
            decay_half_life_days: default_decay_half_life_days(),
            fusion_max_clusters_per_run: default_fusion_max_clusters(),
            archival_utility_threshold: default_archival_utility_threshold(),
            archival_min_age_days: default_archival_min_age_days(),
        }
    }
}

fn default_embedder_name() -> String {
    "hash".to_string()
}
fn default_hot_window_size() -> usize {
    5
}
fn default_max_context_tokens() -> usize {
    8000
}
fn default_rerank_max_candidates() -> usize {
    20
}
fn default_decay_half_life_days() -> f64 {
    30.0
}
fn default_fusion_max_clusters() -> usize {
    5
}
fn default_archival_utility_threshold() -> f64 {
    0.1
}
fn default_archival_min_age_days() -> i64 {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GardenerConfig {
    #[serde(default = "default_light_tick_ms")]
    pub light_tick_ms: u64,
    #[serde(default = "default_deep_tick_ms")]
    pub deep_tick_ms: u64,
    #[serde(default)]
    pub disable_archival: bool,
}

impl Default for GardenerConfig {
    fn default() -> Self {
        Self {
            light_tick_ms: default_light_tick_ms(),
            deep_tick_ms: default_deep_tick_ms(),
            disable_archival: false,
        }
    }
}

fn default_light_tick_ms() -> u64 {
    300_000
}
fn default_deep_tick_ms() -> u64 {
    4_320_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "default_proactive_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub dial_budgets: DialBudgets,
    pub quiet_hours: Option<QuietHours>,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_proactive_cooldown_ms(),
            dial_budgets: DialBudgets::default(),
            quiet_hours: None,
        }
    }
}

fn default_proactive_cooldown_ms() -> u64 {
    21_600_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialBudgets {
    #[serde(default = "default_conservative")]
    pub conservative: u32,
    #[serde(default = "default_moderate")]
    pub moderate: u32,
    #[serde(default = "default_eager")]
    pub eager: u32,
}

impl Default for DialBudgets {
    fn default() -> Self {
        Self {
            conservative: default_conservative(),
            moderate: default_moderate(),
            eager: default_eager(),
        }
    }
}

fn default_conservative() -> u32 {
    1
}
fn default_moderate() -> u32 {
    3
}
fn default_eager() -> u32 {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: u32,
    pub end: u32,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/cortex.db", home)
}

impl CortexConfig {
    /// Load config from a TOML file with CORTEX_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CortexConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CORTEX_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/cortex.toml", home)
}
