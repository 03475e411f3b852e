//! Service layer: job orchestration and health reporting.

pub mod advance_service;
pub mod documentation;
pub mod health_service;
pub mod vote_processor;
