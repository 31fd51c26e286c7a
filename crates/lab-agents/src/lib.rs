//! Reactor host for cohort chat experiments
//!
//! - `config`: TOML + environment configuration
//! - `model_client`: OpenAI-compatible HTTP model adapter
//! - `serve`: runs the coordination reactors against a snapshot-backed store
//! - `balance`: condition-assignment balance check

pub mod balance;
pub mod config;
pub mod model_client;
pub mod serve;

pub use config::{ConfigError, LabConfig, ModelEndpoint};
pub use model_client::HttpModelClient;
