// Export modules
pub mod config;
pub mod enhancement;
pub mod error;
pub mod experiment;
pub mod grid;
pub mod observation;
pub mod report;
pub mod selection;
pub mod similarity;
pub mod surrogate;

// Re-export commonly used types
pub use config::{Config, FailurePolicy, SelectionScope, SurrogateKind};
pub use error::{Result, TunerError};
pub use experiment::{run_experiment, RunContext};
pub use grid::{GridSampler, ParameterTuple};
pub use report::ExperimentReport;
pub use selection::BestResult;
pub use similarity::MetricPair;
