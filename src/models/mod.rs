//! Data models for the Trade Republic API.
//!
//! Models are organized by domain:
//!
//! - [`primitives`] - Core types like `EventId`, `EventType`, `Endpoints`
//! - [`credentials`] - Phone number and PIN
//! - [`event`] - Timeline events and their detail payloads
//! - [`document`] - Document references derived from event details

pub mod primitives;
pub mod credentials;
pub mod event;
pub mod document;

// Re-export commonly used types
pub use primitives::*;
pub use credentials::*;
pub use event::*;
pub use document::*;
