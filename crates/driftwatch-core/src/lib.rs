pub mod baseline;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod model;
pub mod providers;
pub mod refusal;
pub mod report;
pub mod scheduler;
pub mod scoring_api;
pub mod storage;
pub mod submission;
