pub mod error;
pub mod types;

pub use error::{DocDbError, Result};
pub use types::*;
