pub mod config;
pub mod experiment;
pub mod incident;

pub use config::{BusinessHours, ConfigError, EnvironmentConfig, RateLimitConfig, SafetyConfig};
pub use experiment::*;
pub use incident::*;
