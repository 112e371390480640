//! Builtin target connectors.

pub mod echo;
pub mod http;
