//! Showtime Common - configuration and logging shared by the showtime services.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{
    CacheConfig, CatalogConfig, Config, ConversationConfig, DispatchConfig, LlmConfig,
    ObservabilityConfig, RetryConfig, ScheduleConfig, ScheduledJobConfig, SessionConfig,
};
