use core::cell::Cell;

/// The smallest timestamp considered valid: `2023-01-01T00:00:00Z`.
///
/// A device clock reporting an earlier time has not been synchronized yet.
pub const MINIMUM_VALID_TIMESTAMP: u64 = 1_672_531_200;

/// A source of time.
pub trait Clock {
    /// Returns the current `UNIX` timestamp in seconds.
    fn timestamp(&self) -> u64;

    /// Returns a monotonic time in milliseconds.
    fn millis(&self) -> u64;

    /// Returns whether the clock has been synchronized.
    fn is_valid(&self) -> bool {
        self.timestamp() >= MINIMUM_VALID_TIMESTAMP
    }
}

/// A clock whose time is set by the firmware, for instance from an `RTC` or
/// an `NTP` response.
#[derive(Debug, Default)]
pub struct ManualClock {
    timestamp: Cell<u64>,
    millis: Cell<u64>,
}

impl ManualClock {
    /// Creates a [`ManualClock`] starting at the given `UNIX` timestamp.
    #[must_use]
    pub const fn new(timestamp: u64) -> Self {
        Self {
            timestamp: Cell::new(timestamp),
            millis: Cell::new(0),
        }
    }

    /// Sets the `UNIX` timestamp.
    pub fn set_timestamp(&self, timestamp: u64) {
        self.timestamp.set(timestamp);
    }

    /// Moves the clock forward by `millis` milliseconds.
    pub fn advance(&self, millis: u64) {
        let elapsed = self.millis.get().saturating_add(millis);
        let seconds = elapsed / 1000 - self.millis.get() / 1000;
        self.millis.set(elapsed);
        self.timestamp
            .set(self.timestamp.get().saturating_add(seconds));
    }
}

impl Clock for ManualClock {
    fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }

    fn millis(&self) -> u64 {
        self.millis.get()
    }
}
