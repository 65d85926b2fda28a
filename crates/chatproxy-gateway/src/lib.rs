//! Chatproxy Gateway - HTTP entry point for streamed chat completions

pub mod cors;
pub mod handler;
pub mod server;

pub use handler::{chat_handler, Stage};
pub use server::{build_router, start_gateway, GatewayState};
