//! statekeep core - types, typed patches, and error handling

pub mod error;
pub mod patch;
pub mod types;

pub use error::{Error, Result};
pub use patch::{DocumentPatch, PatchOp};
pub use types::*;
