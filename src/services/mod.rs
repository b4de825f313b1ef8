//! Business logic services.
//!
//! The assignment engine and its reviewer selector, plus the HTTP surface
//! that exposes them. Services depend on the store traits, never on sqlx
//! directly.

pub mod assignment;
pub mod http_api;
pub mod http_server;
pub mod selector;

pub use assignment::AssignmentEngine;
pub use http_server::{build_router, AppState};
pub use selector::{RandomSource, SeededRandom, Selector, ThreadRandom};
