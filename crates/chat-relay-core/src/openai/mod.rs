//! OpenAI-compatible envelopes served by the gateway.

pub mod requests;
pub mod responses;

/// Epoch seconds for the `created` field of completion envelopes.
#[must_use]
pub fn created_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
