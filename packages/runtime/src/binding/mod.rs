//! Binding orchestration: one running source→pipeline→target unit, and the
//! service that starts, stops, and atomically replaces the live set.

pub mod binder;
pub mod service;

pub use binder::{Binding, BindingError, BindingState, BindingStatus, Side};
pub use service::{BindingService, ReloadError, StartError, StopFailure, ValidationError};
