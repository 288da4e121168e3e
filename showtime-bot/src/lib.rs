//! Showtime Bot - a chat bot answering questions about movie showtimes.
//!
//! The crate keeps a messaging session alive, answers each conversation
//! partner from cached listings and a text-generation backend, and remembers
//! a bounded slice of every conversation.
//!
//! ## Architecture
//!
//! ```text
//! Transport → SessionLifecycleManager → IdentityLanes → MessageOrchestrator
//!                                                         ├─ TtlCache (listings, details)
//!                                                         ├─ ConversationStore
//!                                                         └─ RetryPolicy → TextGenerator
//! EvictionSweeper ── purges idle conversations and expired details
//! RefreshScheduler ── one-shot timed refreshes of listings and details
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod retry;
pub mod schedule;
pub mod service;
pub mod session;
pub mod sweeper;
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheStats, Cached, Freshness, TtlCache};
pub use catalog::{
    CatalogSource, DetailSource, HttpCatalogSource, HttpDetailSource, MovieDetails, Showtime,
};
pub use cli::CliTransport;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use conversation::{ConversationContext, ConversationStore, Role, Turn};
pub use dispatch::{IdentityLanes, MessageHandler};
pub use error::{BotError, BotResult};
pub use llm::{GenerationRequest, OpenAiCompatibleGenerator, TextGenerator};
pub use message::{InboundMessage, MessageKind};
pub use orchestrator::{MessageOrchestrator, Sources};
pub use retry::{RetryAttempt, RetryPolicy};
pub use schedule::{
    JobEvent, JobEventKind, JobInfo, JobState, RefreshAction, RefreshJob, RefreshScheduler,
    RefreshTarget,
};
pub use service::{start_service, Service};
pub use session::{
    FailureCause, SessionHandle, SessionLifecycleManager, SessionSnapshot, SessionState,
    StatusUpdate,
};
pub use sweeper::{EvictionSweeper, Sweepable, SweeperHandle};
pub use transport::{EventSink, Transport, TransportEvent, TransportSession};
