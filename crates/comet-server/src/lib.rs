//! # comet-server
//!
//! Axum gateway exposing the comet delivery engine over its two transport
//! shapes:
//!
//! - `GET /ws` — WebSocket upgrade; one envelope per text frame, ping frames
//!   while idle, replay on reconnect
//! - `GET /poll` — long-poll; one JSON array response per request
//! - `GET /health`, `GET /metrics` — operational surface
//!
//! A scheduler task drives timeout processing and session reaping; graceful
//! shutdown answers every pending long poll with `[]` before exit.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod poll;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod ws;

pub use config::ServerConfig;
pub use server::{AppState, CometServer};
pub use shutdown::ShutdownCoordinator;
