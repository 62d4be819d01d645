pub mod classifier;
pub mod error;
pub mod health;
pub mod ledger;
pub mod openai_compat;
pub mod pool;
pub mod provider;
pub mod router;

pub use classifier::{classify, Tier};
pub use error::RouterError;
pub use health::HealthTracker;
pub use ledger::{PricingTable, UsageLedger};
pub use openai_compat::OpenAiCompatProvider;
pub use pool::ProviderPool;
pub use provider::{
    ChatRequest, ChatResponse, ContentBlock, LlmProvider, Message, ProviderError, Role, StopReason,
    ToolDefinition, Usage,
};
pub use router::{route, RouteDecision, RouterTiers, TierModel};
