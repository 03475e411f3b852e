//! Library crate for clip-clash-back, exposing modules for the binary and integration tests.

pub mod breaker;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod lock;
pub mod queue;
pub mod routes;
pub mod services;
pub mod state;
