pub mod assets;
pub mod compiler;
pub mod container;
mod error;
pub mod extractor;
pub mod game;
pub mod installer;
pub mod loader;
pub mod manifest;
mod strings;

pub use error::{ChangeFailure, MergeError, Result, SchemaViolation};
