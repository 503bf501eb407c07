//! Shared primitive types used across the timer engine.

/// Wall-clock milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Stable identifier of an encounter document.
pub type EncounterId = String;

/// Stable identifier of a session user.
pub type UserId = String;

/// Stable identifier of a participant inside an encounter.
pub type ParticipantId = String;

/// Monotonic counter stamped on every host mutation of the clock.
pub type Revision = u64;
