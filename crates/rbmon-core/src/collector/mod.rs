//! Host access seams used by the classifier and its tests.

pub mod mock;
pub mod traits;

pub use traits::{CommandOutput, CommandRunner, FileSystem, RealCommands, RealFs};
