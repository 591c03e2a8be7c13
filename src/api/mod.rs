pub mod middleware;
pub mod routes;

// Re-export public types and functions
pub use middleware::log_request_errors;
pub use routes::{StartResponse, StopResponse, serve_stream, start_stream, stop_stream};
