//! In-memory host doubles for tests and fixtures.

mod commands;
mod filesystem;
mod metadata;
pub mod scenarios;

pub use commands::MockCommands;
pub use filesystem::MockFs;
pub use metadata::{MetadataCall, MockMetadata};
