//! Bounded per-project log backlog.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use iotsim_core::types::DbId;

use crate::bus::SimulationEvent;

/// Default number of entries kept per project.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Ring buffers of recent [`SimulationEvent`]s, one per project.
///
/// Each project keeps at most `capacity` entries; the oldest are evicted
/// first. Operations take a short synchronous lock and never await.
pub struct LogHistory {
    capacity: usize,
    entries: Mutex<HashMap<DbId, VecDeque<SimulationEvent>>>,
}

impl LogHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, evicting the oldest entry for its project if full.
    pub fn record(&self, event: SimulationEvent) {
        let mut entries = self.lock();
        let buf = entries.entry(event.project_id).or_default();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(event);
    }

    /// The most recent `limit` entries for one project, oldest first.
    pub fn project(&self, project_id: DbId, limit: Option<usize>) -> Vec<SimulationEvent> {
        let entries = self.lock();
        let Some(buf) = entries.get(&project_id) else {
            return Vec::new();
        };
        let take = limit.unwrap_or(self.capacity).min(buf.len());
        buf.iter().skip(buf.len() - take).cloned().collect()
    }

    /// The most recent `limit` entries across all projects, oldest first.
    pub fn all(&self, limit: Option<usize>) -> Vec<SimulationEvent> {
        let entries = self.lock();
        let mut merged: Vec<SimulationEvent> = entries.values().flatten().cloned().collect();
        merged.sort_by_key(|e| e.timestamp);
        let take = limit.unwrap_or(self.capacity).min(merged.len());
        merged.split_off(merged.len() - take)
    }

    /// Drop the backlog for a project.
    pub fn clear_project(&self, project_id: DbId) {
        self.lock().remove(&project_id);
    }

    pub fn len(&self, project_id: DbId) -> usize {
        self.lock().get(&project_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values().all(VecDeque::is_empty)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DbId, VecDeque<SimulationEvent>>> {
        // A poisoned lock only means a panic mid-push; the data is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LogHistory {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulationEventType;

    fn event(project_id: DbId, message: &str) -> SimulationEvent {
        SimulationEvent::new(project_id, 1, "dev", SimulationEventType::MessageSent, message)
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let history = LogHistory::new(3);
        for i in 0..5 {
            history.record(event(1, &format!("m{i}")));
        }
        let messages: Vec<_> = history.project(1, None).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn projects_are_isolated() {
        let history = LogHistory::new(2);
        history.record(event(1, "a"));
        history.record(event(2, "b"));
        history.record(event(2, "c"));
        history.record(event(2, "d"));
        assert_eq!(history.len(1), 1);
        assert_eq!(history.len(2), 2);
    }

    #[test]
    fn limit_returns_newest() {
        let history = LogHistory::new(10);
        for i in 0..6 {
            history.record(event(1, &format!("m{i}")));
        }
        let last_two: Vec<_> = history.project(1, Some(2)).into_iter().map(|e| e.message).collect();
        assert_eq!(last_two, vec!["m4", "m5"]);
    }

    #[test]
    fn all_merges_by_time() {
        let history = LogHistory::new(10);
        history.record(event(1, "first"));
        std::thread::sleep(std::time::Duration::from_millis(2));
        history.record(event(2, "second"));
        let all = history.all(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "first");
        assert_eq!(history.all(Some(1))[0].message, "second");
    }

    #[test]
    fn clear_project_removes_backlog() {
        let history = LogHistory::default();
        history.record(event(7, "x"));
        history.clear_project(7);
        assert!(history.project(7, None).is_empty());
        assert!(history.is_empty());
    }
}
