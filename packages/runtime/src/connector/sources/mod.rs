//! Builtin source connectors.

pub mod channel;
pub mod echo;
