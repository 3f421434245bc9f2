use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
/// Frames queued for one peer before it counts as stalled and is dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;
/// Pause after a failed `accept` so a persistent error does not spin the loop.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
