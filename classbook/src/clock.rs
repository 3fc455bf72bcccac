//! Source of the current time for cancellation-window checks.

use std::sync::Arc;

use crate::types::Timestamp;

/// Provides the current time.
///
/// The engine never reads the system clock directly, which lets tests pin
/// "now" to an exact distance from a class's start time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn shared_clock_delegates() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let before = Timestamp::now();
        assert!(clock.now() >= before);
    }
}
