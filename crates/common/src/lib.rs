//! Types shared by the ordercli crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
