//! HTTP API handlers for wavdrop-web
//!
//! Page + static assets, the multipart `/process` trigger, SSE progress
//! stream and health check.

pub mod health;
pub mod process;
pub mod sse;
pub mod ui;

pub use health::health_routes;
pub use process::process_routes;
pub use sse::event_stream;
pub use ui::ui_routes;
