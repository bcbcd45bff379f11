pub mod aggregate;
pub mod runner;
pub mod stats;

pub use runner::{RunMetadata, RunnerOptions, SuiteRunner, CORRECTNESS_MAX_TOKENS};
