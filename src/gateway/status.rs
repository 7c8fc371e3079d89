//! Gateway status counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Live counters for this gateway instance.
#[derive(Debug, Default)]
pub struct Status {
    online_people: AtomicI64,
}

/// Serializable view of [`Status`], served on `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub online_people: i64,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increase_online_people(&self) {
        self.online_people.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrease_online_people(&self) {
        self.online_people.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of registered sessions.
    pub fn online_people(&self) -> i64 {
        self.online_people.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            online_people: self.online_people(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_tracks_increments_and_decrements() {
        let status = Status::new();
        status.increase_online_people();
        status.increase_online_people();
        status.decrease_online_people();
        assert_eq!(status.online_people(), 1);
    }

    #[test]
    fn snapshot_serializes_with_snake_case_field() {
        let status = Status::new();
        status.increase_online_people();

        let json = serde_json::to_string(&status.snapshot()).unwrap();
        assert_eq!(json, r#"{"online_people":1}"#);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let status = Arc::new(Status::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let status = status.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        status.increase_online_people();
                    }
                    for _ in 0..400 {
                        status.decrease_online_people();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(status.online_people(), 8 * 600);
    }
}
