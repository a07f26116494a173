//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Authenticate requests and enforce roles
//! - Throttle clients per rate limit tier
//! - Short-circuit requests (reject unauthorized or throttled callers)

/// Bearer session authentication and the admin gate
pub mod auth;

/// Caller IP and user agent extraction
pub mod client_info;

/// Fixed-window rate limiting per tier
pub mod rate_limit;
