// Re-export modules
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod store;
pub mod utils;

pub use engine::ScoringPipeline;
pub use error::ScoringError;
pub use models::{RiskAssessment, UseCase};
