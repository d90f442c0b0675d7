//! Clock and ID generation (component A) — thin traits so the executor's
//! tests can inject deterministic timestamps and ids instead of racing the
//! wall clock.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock that advances by a fixed step every time it is read, so
    /// ordering assertions in tests never depend on wall-clock timing.
    pub struct StepClock {
        next: Mutex<DateTime<Utc>>,
        step_ms: i64,
    }

    impl StepClock {
        pub fn new(start: DateTime<Utc>, step_ms: i64) -> Self {
            Self {
                next: Mutex::new(start),
                step_ms,
            }
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            let mut guard = self.next.lock();
            let current = *guard;
            *guard = current + chrono::Duration::milliseconds(self.step_ms);
            current
        }
    }

    /// A counter-backed id generator producing `id-0`, `id-1`, ... so test
    /// assertions can reference ids without reading them back first.
    #[derive(Default)]
    pub struct CountingIdGenerator {
        counter: AtomicU64,
    }

    impl IdGenerator for CountingIdGenerator {
        fn new_id(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("id-{n}")
        }
    }
}
