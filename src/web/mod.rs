//! Standalone HTTP server: API routes, CORS and the optional SPA bundle.

pub mod server;

pub use server::WebServer;
