//! Per-session announcement counter.
//!
//! Every announcement a session sends carries a sequence number.  The first
//! announcement is number 1, the second number 2, and so on.  The counter
//! lives inside one session and is thrown away with it, so every new session
//! starts counting from 1 again.

/// A monotonically increasing counter for announcement sequence numbers.
///
/// The counter starts at 0 and [`next_seq`](Self::next_seq) returns the value
/// *after* incrementing, so the first announcement is numbered 1.
///
/// # Examples
///
/// ```rust
/// use beacon_core::protocol::SequenceCounter;
///
/// let mut counter = SequenceCounter::new();
/// assert_eq!(counter.next_seq(), 1);
/// assert_eq!(counter.next_seq(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    /// Creates a new counter at 0 (nothing sent yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and returns the new value.
    ///
    /// Wraps from `u64::MAX` to 0 without panicking.
    pub fn next_seq(&mut self) -> u64 {
        self.last = self.last.wrapping_add(1);
        self.last
    }
}
