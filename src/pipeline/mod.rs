pub mod executor;
pub mod progress;
pub mod retry;

pub use executor::{Collaborators, ExecutorSettings, ItemOutcome, PipelineExecutor, StageError};
pub use retry::RetryPolicy;
