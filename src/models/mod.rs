//! Data models exchanged with callers and with the compute backend.
//!
//! Everything here serializes as JSON via `serde`; unknown fields that must
//! survive a round trip are captured with `#[serde(flatten)]`.

pub mod app;
pub mod credentials;
pub mod machine;
