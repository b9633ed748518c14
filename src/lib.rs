pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod relay;
pub mod router;
pub mod source;
pub mod telegram;

pub use error::{RelayError, Result};
