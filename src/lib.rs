//! Dual-view braille editing core: element maps linking a document tree to
//! its source and braille renderings, section windowing, and a background
//! reformatter driven by the session manager.

pub mod document;
pub mod engine;
pub mod import;
pub mod layout;
pub mod manager;
pub mod map;
pub mod notification;
pub mod panic_handler;
pub mod reformatter;
pub mod sections;
pub mod settings;

pub use document::{Document, EditOp, NodeId, NodeKind, SharedDocument};
pub use engine::{GradeOneEngine, Transcriber};
pub use manager::{EditPath, Manager, SessionConfig, SessionError};
pub use map::{ElementMap, MapEntry, View};
