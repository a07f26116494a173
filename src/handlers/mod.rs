//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service for validation and database work
//! 3. Returns HTTP response (JSON, status code)

/// Rental agreement generation and retrieval
pub mod agreements;
/// Registration, login, OTP and session endpoints
pub mod auth;
/// Booking lifecycle endpoints
pub mod bookings;
/// Local PDF file serving
pub mod files;
/// Health check and service info
pub mod health;
/// Property listing, search, favorites and moderation
pub mod properties;
/// Property types and amenities
pub mod reference;
/// Admin security monitoring
pub mod security;
/// User settings
pub mod settings;
/// Digital signatures on agreements
pub mod signatures;
/// Cloud file uploads
pub mod uploads;
/// Profiles and admin user management
pub mod users;
