//! CSA/x1 line-protocol shogi server.
//!
//! Connections log in, pair up through `%%GAME`/`%%CHALLENGE` requests, run
//! the AGREE handshake and then relay moves through a [`game::Game`] engine.
//! All shared state lives in one [`league::League`] behind a single lock.

pub mod command;
pub mod config;
pub mod connection;
pub mod game;
pub mod league;
pub mod matchmaker;
pub mod player;
pub mod ratings;
pub mod server;
pub mod write_guard;
