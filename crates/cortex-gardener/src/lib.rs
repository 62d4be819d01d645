pub mod behavioral;
pub mod engine;
pub mod error;
pub mod light_tick;
pub mod steps;
pub mod types;

pub use engine::GardenerEngine;
pub use error::{GardenerError, Result};
pub use steps::{LlmSessionSummarizer, SessionSummarizer};
pub use types::{DeepTickReport, LightTickReport, StepOutcome};
