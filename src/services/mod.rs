//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They own transactional units and never see HTTP types.

pub mod transfer_service;
pub mod user_service;
