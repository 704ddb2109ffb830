pub mod controller;
pub mod deletion;
pub mod engine;
pub mod error;
mod pagination;
pub mod result_model;
pub mod selection;
pub mod status;
pub mod transport;

pub use controller::{
    ControllerOptions, ScanOptions, SessionController, SessionEvent, SessionSnapshot,
};
pub use deletion::{DeleteProgress, ReconcilePolicy};
pub use engine::ScanEngine;
pub use error::SessionError;
pub use result_model::{RemovalSummary, ResultModel};
pub use selection::{CategorySelection, ExpandedSet, Selection};
pub use status::{SessionCorrelation, SessionStatus};
pub use transport::HttpScanEngine;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
