//! Shared types and services for the scraping cluster: the Job/Host
//! State/Proxy Entry/Worker Record/Outcome Record data model, and the
//! Proxy Manager, User-Agent Rotator, Feedback Governor, Request Dispatcher,
//! and Parser Registry that both the worker and controller binaries build
//! on top of.

pub mod dispatcher;
pub mod error;
pub mod governor;
pub mod parser;
pub mod proxy;
pub mod telemetry;
pub mod types;
pub mod user_agent;

pub use dispatcher::{DispatchOutcome, RequestDispatcher};
pub use error::{ConfigurationError, JobError, JobErrorKind, StoreTransient};
pub use governor::{FeedbackGovernor, GovernorConfig};
pub use parser::{ParserFn, ParserRegistry};
pub use proxy::ProxyManager;
pub use telemetry::init_tracing;
pub use types::*;
pub use user_agent::UserAgentRotator;
