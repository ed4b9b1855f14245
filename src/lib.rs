//! Vesper - a voice-first personal agent runtime
//!
//! This library provides the core of the Vesper agent:
//! - Always-on wake word spotting and utterance recording
//! - A bounded priority queue feeding a single dispatcher
//! - Streaming LLM replies split into sentences and spoken in order
//! - Calendar alerts, planned actions and desire-driven initiative
//! - Background mood and long-term memory updates
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Producers                        │
//! │  Listener  │  Calendar  │  Planner  │  Initiative     │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ PriorityEventQueue
//! ┌─────────────────────▼────────────────────────────────┐
//! │                     Dispatcher                        │
//! │   Assistant  →  LLM stream  →  ResponseSegmenter      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ sentences, in order
//! ┌─────────────────────▼────────────────────────────────┐
//! │   OrderedSpeechSink  │  mood / memory updaters        │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod agenda;
pub mod assistant;
pub mod background;
pub mod config;
pub mod context;
pub mod daemon;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod feedback;
pub mod llm;
pub mod memory;
pub mod mood;
pub mod prompt;
pub mod speech;
pub mod voice;

pub use assistant::{Assistant, TurnInput};
pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use dispatcher::{Dispatcher, EventHandler};
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventSource, Priority, PriorityEventQueue};
pub use speech::{OrderedSpeechSink, ResponseSegmenter};
