//! Shared executor types: errors, results and target descriptors.

pub mod error;
pub mod result;
pub mod target;

pub use error::*;
pub use result::*;
pub use target::*;
