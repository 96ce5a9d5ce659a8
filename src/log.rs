//! The replicated log: an append-only sequence of `(term, command)` pairs
//! with committed/applied cursors. One `Log` lives inside each node's
//! `SharedState` (see `consensus::state`).

use crate::command::Command;

/// A single, immutable log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: u64,
    pub command: Command,
}

/// Sentinel used throughout the consensus engine for "no entry" / "empty
/// log" positions, matching the spec's `-1` convention for indices and
/// terms on an otherwise unsigned domain.
pub const NONE_INDEX: i64 = -1;

#[derive(Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
    committed_index: i64,
    applied_index: i64,
}

impl Log {
    pub fn new() -> Self {
        Log { entries: Vec::new(), committed_index: NONE_INDEX, applied_index: NONE_INDEX }
    }

    pub fn size(&self) -> i64 {
        self.entries.len() as i64
    }

    pub fn entry_at(&self, index: i64) -> Option<&LogEntry> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    pub fn last_term(&self) -> i64 {
        self.entries.last().map(|e| e.term as i64).unwrap_or(NONE_INDEX)
    }

    pub fn last_index(&self) -> i64 {
        self.size() - 1
    }

    pub fn committed_index(&self) -> i64 {
        self.committed_index
    }

    pub fn applied_index(&self) -> i64 {
        self.applied_index
    }

    /// Appends `entry`, returning its new index.
    pub fn append(&mut self, entry: LogEntry) -> i64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Drops every entry with index >= `index`. Callers must never truncate
    /// a committed entry; this is enforced with a debug assertion rather
    /// than a recoverable error since a correct consensus engine never
    /// attempts it (Log Matching / State Safety, spec §3).
    pub fn truncate_from(&mut self, index: i64) {
        debug_assert!(index > self.committed_index, "refusing to truncate committed entries");
        if index < 0 {
            self.entries.clear();
        } else {
            self.entries.truncate(index as usize);
        }
    }

    /// Advances `committed_index` to `min(up_to, size - 1)` if that is an
    /// increase. Monotonic — never moves backwards.
    pub fn commit(&mut self, up_to: i64) {
        let target = up_to.min(self.last_index());
        if target > self.committed_index {
            self.committed_index = target;
        }
    }

    /// Advances `applied_index` by one and returns the newly-applied entry,
    /// or `None` if everything committed has already been applied.
    pub fn apply_next(&mut self) -> Option<(i64, LogEntry)> {
        if self.applied_index < self.committed_index {
            self.applied_index += 1;
            let entry = self.entry_at(self.applied_index).cloned()?;
            Some((self.applied_index, entry))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, id: &str) -> LogEntry {
        LogEntry { term, command: Command::ListTopics { id: id.to_string() } }
    }

    #[test]
    fn empty_log_reports_sentinel_positions() {
        let log = Log::new();
        assert_eq!(log.size(), 0);
        assert_eq!(log.last_index(), -1);
        assert_eq!(log.last_term(), -1);
        assert_eq!(log.committed_index(), -1);
        assert_eq!(log.applied_index(), -1);
    }

    #[test]
    fn append_grows_size_by_one_and_returns_new_index() {
        let mut log = Log::new();
        assert_eq!(log.append(entry(1, "a")), 0);
        assert_eq!(log.append(entry(1, "b")), 1);
        assert_eq!(log.size(), 2);
    }

    #[test]
    fn commit_is_monotonic_and_clamped_to_log_size() {
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.commit(5); // clamp to last_index() == 1
        assert_eq!(log.committed_index(), 1);
        log.commit(0); // must not move backwards
        assert_eq!(log.committed_index(), 1);
    }

    #[test]
    fn apply_next_walks_forward_one_at_a_time() {
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.commit(1);
        let (i0, e0) = log.apply_next().unwrap();
        assert_eq!(i0, 0);
        assert_eq!(e0.command.id(), "a");
        let (i1, e1) = log.apply_next().unwrap();
        assert_eq!(i1, 1);
        assert_eq!(e1.command.id(), "b");
        assert!(log.apply_next().is_none());
    }

    #[test]
    fn truncate_from_drops_suffix() {
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.append(entry(2, "c"));
        log.truncate_from(1);
        assert_eq!(log.size(), 1);
        assert_eq!(log.last_term(), 1);
    }
}
