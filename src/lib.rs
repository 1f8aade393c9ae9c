//! Backend and typed client for the gastos personal-finance tracker.
//!
//! The HTTP surface lives in [`api`], business logic in [`core`], the
//! bearer-token plumbing in [`auth`], and [`client`] talks to a running
//! server the same way the browser front end does.

pub mod api;
pub mod auth;
pub mod client;
pub mod core;
pub mod error;
pub mod state;
pub mod web;

pub use error::{AppError, AppResult};
pub use state::AppState;
