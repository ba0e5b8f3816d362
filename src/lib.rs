//! Chess match host: runs bot, offline-pair and online matches for browser
//! pages connected over a websocket.

pub mod config;
pub mod error;
pub mod game;
pub mod models;
pub mod relay;
pub mod routes;
pub mod websocket;
