//! Incremental message discovery for a live chat page.
//!
//! Provides:
//! - `SyncEngine` - One discovery pass across the open chat and every chat with a badge
//! - `CursorMap` - Last delivered message per chat

pub mod cursor;
pub mod engine;
pub mod extract;

pub use cursor::CursorMap;
pub use engine::{SyncEngine, SyncError};
