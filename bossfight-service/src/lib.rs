//! # bossfight-service: Host Integration for bossfight
//!
//! This crate connects the host-agnostic `bossfight-core` library to a
//! running community bot: it turns host callbacks into engine calls, drives
//! the periodic systems on a tokio runtime and ships the `bossfightd` daemon.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Host bot                  │
//! │  ┌───────────────────────────────────┐  │
//! │  │        bossfight-service          │  │
//! │  │  ┌─────────────┐ ┌─────────────┐  │  │
//! │  │  │    Hooks    │ │   Systems   │  │  │
//! │  │  └──────┬──────┘ └──────┬──────┘  │  │
//! │  │         │               │         │  │
//! │  │         ▼               ▼         │  │
//! │  │    ┌─────────────────────────┐    │  │
//! │  │    │     bossfight-core      │    │  │
//! │  │    └─────────────────────────┘    │  │
//! │  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: Service configuration wrapping the engine config
//! - `error`: Service-level error type
//! - `events`: Inbound activity events and outbound engine notifications
//! - `hooks`: Fire-and-forget entry points for the host
//! - `runtime`: Store opening, state restore and scope bootstrap
//! - `systems`: Voice, flush and pool tick loops

pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod runtime;
pub mod systems;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use events::{ActivityEvent, EngineEvent};
pub use hooks::Hooks;
pub use systems::{RunningSystems, Systems};
