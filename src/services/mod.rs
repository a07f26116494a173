//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and calls to external
//! providers.

pub mod activity_logger;
pub mod agreement_service;
pub mod ai_client;
pub mod anomaly_service;
pub mod auth_service;
pub mod booking_service;
pub mod cloud_storage;
pub mod mail_service;
pub mod otp_service;
pub mod password;
pub mod pdf;
pub mod property_service;
pub mod rate_limiter;
pub mod settings_service;
pub mod signature_service;
pub mod token_service;
pub mod upload_service;
pub mod user_service;
