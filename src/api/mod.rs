//! 面向操作员的薄接口层
//!
//! HTTP/UI 只需把这里的函数包一层并序列化返回值。

pub mod control;
pub mod models;

pub use control::{manual_capture, set_periodic_enabled, set_session, status, Controls};
pub use models::{ApiError, CaptureResponse, PeriodicResponse, StatusResponse};
