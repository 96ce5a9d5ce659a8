//! Per-node volatile consensus state: role, term, vote bookkeeping,
//! election timer, and (leader-only) replication cursors. Grounded in
//! `jteplitz602-Rusty-Raft`'s `server::State`/`Config` shape and
//! `original_source/src/raft.py`'s `Node`/`Role`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Randomized election timeout range, redrawn every time the timer resets
/// (spec §4.3). Carried as a config value rather than a hardcoded constant
/// so property tests can shrink it for fast deterministic runs.
#[derive(Debug, Clone, Copy)]
pub struct ElectionTimeoutRange {
    pub min: Duration,
    pub max: Duration,
}

impl ElectionTimeoutRange {
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        let span_ms = (self.max - self.min).as_millis() as u64;
        let offset_ms = rng.gen_range(0..=span_ms);
        self.min + Duration::from_millis(offset_ms)
    }
}

pub struct NodeState {
    pub id: u64,
    pub term: u64,
    pub role: Role,
    pub voted_for: Option<u64>,
    pub leader_hint: Option<u64>,
    pub last_heartbeat_at: Instant,
    pub election_timeout: Duration,
    /// Leader-only: when this node last drove a replication/heartbeat round
    /// (spec §4.3's "leaders drive their own heartbeat cadence").
    pub last_replicate_at: Instant,
    /// Present only while `role == Leader`; cleared on every transition out.
    pub next_index: HashMap<u64, i64>,
    pub match_index: HashMap<u64, i64>,
}

impl NodeState {
    pub fn new(id: u64, now: Instant, timeouts: &ElectionTimeoutRange) -> Self {
        NodeState {
            id,
            term: 0,
            role: Role::Follower,
            voted_for: None,
            leader_hint: None,
            last_heartbeat_at: now,
            election_timeout: timeouts.sample(),
            last_replicate_at: now,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        }
    }

    /// Whether at least `interval` has elapsed since the last heartbeat/
    /// replication round this leader drove.
    pub fn heartbeat_due(&self, now: Instant, interval: Duration) -> bool {
        now.duration_since(self.last_replicate_at) >= interval
    }

    pub fn mark_replicated(&mut self, now: Instant) {
        self.last_replicate_at = now;
    }

    pub fn reset_election_timer(&mut self, now: Instant, timeouts: &ElectionTimeoutRange) {
        self.last_heartbeat_at = now;
        self.election_timeout = timeouts.sample();
    }

    pub fn election_timer_expired(&self, now: Instant) -> bool {
        self.role != Role::Leader && now.duration_since(self.last_heartbeat_at) >= self.election_timeout
    }

    /// Adopts `term` and resets vote/leader-cursor state if it is strictly
    /// newer than our own. Returns whether an adoption happened. `votedFor`
    /// is cleared only here — never on an equal-term observation (Open
    /// Question #2).
    pub fn adopt_term_if_newer(&mut self, term: u64) -> bool {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.demote_to_follower();
            true
        } else {
            false
        }
    }

    pub fn demote_to_follower(&mut self) {
        self.role = Role::Follower;
        self.next_index.clear();
        self.match_index.clear();
    }

    pub fn become_candidate(&mut self, now: Instant, timeouts: &ElectionTimeoutRange) {
        self.role = Role::Candidate;
        self.term += 1;
        self.voted_for = Some(self.id);
        self.reset_election_timer(now, timeouts);
    }

    /// Transitions to Leader, initializing per-peer replication cursors and
    /// backdating `last_replicate_at` so the first heartbeat round fires on
    /// the very next tick rather than waiting a full heartbeat interval.
    pub fn become_leader(&mut self, now: Instant, heartbeat_interval: Duration, last_log_index: i64, peer_ids: &[u64]) {
        self.role = Role::Leader;
        self.leader_hint = Some(self.id);
        self.last_replicate_at = now.checked_sub(heartbeat_interval).unwrap_or(now);
        self.next_index.clear();
        self.match_index.clear();
        for peer in peer_ids {
            self.next_index.insert(*peer, last_log_index + 1);
            self.match_index.insert(*peer, -1);
        }
    }
}
