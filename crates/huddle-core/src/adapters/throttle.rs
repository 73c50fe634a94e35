//! In-memory [`ThrottleStore`] adapter (one browser-tab/session scope).

use std::sync::Mutex;

use crate::application::ports::{ThrottleRecord, ThrottleStore};

pub struct InMemoryThrottleStore {
    record: Mutex<ThrottleRecord>,
}

impl InMemoryThrottleStore {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(ThrottleRecord::default()),
        }
    }
}

impl Default for InMemoryThrottleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleStore for InMemoryThrottleStore {
    fn load(&self) -> ThrottleRecord {
        *self.record.lock().unwrap()
    }

    fn save(&self, record: ThrottleRecord) {
        *self.record.lock().unwrap() = record;
    }
}
