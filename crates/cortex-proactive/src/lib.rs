pub mod error;
pub mod evaluator;
pub mod prefilter;
pub mod signals;
pub mod triage;
pub mod types;

pub use error::{ProactiveError, Result};
pub use evaluator::ProactiveEvaluator;
pub use triage::Triage;
pub use types::{EvaluationSummary, GapSignal, Severity, TriageAction, TriageItem};
