//! Core abstractions for relaying a browser-hosted chat app as typed events.
//!
//! This crate provides the fundamental building blocks:
//! - `PageSurface` / `ElementHandle` - The live-page contract the core consumes
//! - `EventBus` - Typed, sequential publish/subscribe
//! - `AdapterConfig` - Timings, traffic pattern and selectors
//! - Data model shared by the session and sync crates

pub mod config;
pub mod events;
pub mod model;
pub mod network;
pub mod surface;

#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

pub use config::{AdapterConfig, ConfigError, Selectors};
pub use events::{
    AdapterEvent, AdapterHandle, AdapterId, BoxError, Envelope, EventBus, EventKind, HandlerError,
    HandlerId, HandlerResult, SharedError,
};
pub use model::{
    AccountCredentials, Chat, ChatId, ImageMessage, Message, MessageId, MessageKind,
    SessionState, TextMessage,
};
pub use network::{NetworkResponse, TrafficPattern};
pub use surface::{ElementHandle, PageSurface, SurfaceError};
