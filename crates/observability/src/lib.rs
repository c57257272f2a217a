//! Process-wide logging setup shared by the shop floor binaries.

pub mod tracing;

pub use crate::tracing::{LogFormat, init, init_with};
