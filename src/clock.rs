//! Time source abstraction
//!
//! Challenge and session expiry are evaluated against an injected clock so
//! TTL behaviour can be exercised without sleeping.

use chrono::{DateTime, Utc};

/// Abstracts the wall clock
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(feature = "testing", test))]
pub use fake::FakeClock;

#[cfg(any(feature = "testing", test))]
mod fake {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, Utc};

    use super::Clock;

    /// Manually driven clock for tests
    #[derive(Debug, Clone)]
    pub struct FakeClock {
        t: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self::new_set(Utc::now())
        }

        pub fn new_set(t: DateTime<Utc>) -> Self {
            Self {
                t: Arc::new(Mutex::new(t)),
            }
        }

        pub fn set(&self, t: DateTime<Utc>) {
            let mut current = self.t.lock().unwrap_or_else(|e| e.into_inner());
            if *current > t {
                panic!("The previous time [{}] is more than new time [{t}]", *current);
            }
            *current = t;
        }

        pub fn advance(&self, quantum: Duration) {
            let mut current = self.t.lock().unwrap_or_else(|e| e.into_inner());
            *current += quantum;
        }
    }

    impl Default for FakeClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.t.lock().unwrap_or_else(|e| e.into_inner())
        }
    }
}
