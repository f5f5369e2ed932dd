//! API models and handlers.

use std::sync::Arc;

use crate::controller::Controller;

pub mod error;
pub mod meta;
pub mod results;
pub mod runs;
pub mod stages;
pub mod uploads;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The run/stage controller.
    pub controller: Arc<Controller>,
}
