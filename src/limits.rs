use std::time::Duration;

use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;

/// Every reservation gets this much time at registration.
pub const RESERVATION_DURATION_MS: Ms = 2 * 60 * MINUTE_MS;

/// Scheduler cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ── Alarm thresholds ─────────────────────────────────────────────

pub const TEN_MINUTE_THRESHOLD: i64 = 10;
pub const FIVE_MINUTE_THRESHOLD: i64 = 5;

// ── Intake limits ────────────────────────────────────────────────

pub const MAX_TABLE_NUMBER_LEN: usize = 32;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_PARTY_SIZE: u32 = 1_000;
/// One adjustment may move `endTime` by at most a day either way.
pub const MAX_ADJUST_MINUTES: i64 = 24 * 60;

pub const MAX_RESERVATIONS: usize = 10_000;

/// Longest JSON line a viewer may send.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// Broadcast buffer per viewer before it is considered lagged.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

/// Pending flush requests before mutations start waiting on the writer.
pub const PERSIST_QUEUE_CAPACITY: usize = 1024;
