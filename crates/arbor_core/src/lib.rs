//! ARBOR Core Types
//!
//! Pure types shared by the exploration engine and its collaborators.
//! Nothing in this crate spawns threads or touches the semantics layer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod settings;
pub mod tag;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::NodeId;
pub use settings::Settings;
pub use tag::Tag;
pub use time::{Stopwatch, format_seconds};
