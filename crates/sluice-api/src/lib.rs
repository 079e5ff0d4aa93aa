//! Sluice API Library
//!
//! The upload-intercepting gateway: the multipart interception engine,
//! pre-authorization and upstream clients, handlers and server setup.

pub mod error;
pub mod handlers;
pub mod intercept;
pub mod preauth;
pub mod setup;
pub mod state;
pub mod telemetry;
pub mod upstream;

pub use error::{ErrorResponse, HttpAppError};
pub use intercept::{intercept, InterceptLimits, Intercepted, RewrittenBody};
pub use preauth::{Authorization, HttpPreAuthorizer, PreAuthorizer};
pub use state::AppState;
pub use upstream::{HttpUpstream, Upstream};
