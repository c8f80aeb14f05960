//! `tarsy-gateway` — the HTTP/WebSocket front door and broadcast layer.

pub mod api;
pub mod bootstrap;
pub mod sanitize;
pub mod state;
pub mod ws;
