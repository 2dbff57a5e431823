use chrono::{DateTime, Utc};

/// Source of "now" for every duration computed by the lifecycle manager
/// and the reminder scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::Mutex;

    use chrono::{DateTime, Duration, Utc};

    use super::Clock;

    // Clock that only moves when a test tells it to
    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self(Mutex::new(start))
        }

        pub fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }

        pub fn advance(&self, d: Duration) {
            let mut t = self.0.lock().unwrap();
            *t = *t + d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}
