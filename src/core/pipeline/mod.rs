mod controller;
mod error_log;
mod errors;
mod session;

pub use controller::{ExtractionPipeline, MonitorTiming, PipelineMonitor, SweepReport};
pub use error_log::{list_error_logs, ErrorLog, ErrorRecord};
pub use errors::{ErrorKind, PipelineError};
pub use session::SessionContext;
