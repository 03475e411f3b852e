//! Request and response DTOs for the HTTP surface.

pub mod health;
pub mod jobs;

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Render a timestamp as RFC 3339 for response bodies.
pub(crate) fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
