//! Logging utilities.
//!
//! Centralizes logger initialization on top of the `log` facade. Library code
//! only ever logs through `log`; hosts choose the backend.

mod init;

pub use init::{LoggingConfig, init_logging};
