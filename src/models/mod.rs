//! Data models representing database entities.
//!
//! This module contains the structures that map to database tables, the
//! request bodies that create or change them, and the pure rules that
//! govern them.

/// Security activity log entries
pub mod activity;
/// Rental agreements generated for approved bookings
pub mod agreement;
/// Detected security anomalies and the dashboard summary
pub mod anomaly;
/// Bookings and their status transitions
pub mod booking;
/// Page/limit query parameters and paginated responses
pub mod pagination;
/// Property listings, reference data and moderation
pub mod property;
/// Bearer sessions and one-time codes
pub mod session;
/// Per-user preferences
pub mod settings;
/// Digital signature tokens and records
pub mod signature;
/// Users and roles
pub mod user;
