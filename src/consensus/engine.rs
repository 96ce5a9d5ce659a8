use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{Command, CommandResult};
use crate::log::{Log, LogEntry, NONE_INDEX};
use crate::node::{ElectionTimeoutRange, NodeState, Role};
use crate::state_machine::StateMachine;
use crate::transport::{InMemoryPeer, Transport, TransportError};
use crate::wire::{AppendEntriesReply, AppendEntriesRequest, LogEntryWire, RequestVoteReply, RequestVoteRequest};

#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub election: ElectionTimeoutRange,
    pub tick_interval: Duration,
    /// Cadence at which a leader drives a replication/heartbeat round,
    /// independent of `tick_interval` (spec §4.3).
    pub heartbeat_interval: Duration,
    pub rpc_timeout: Duration,
    /// Bound on concurrent outbound peer RPCs per election/replication
    /// round (spec §5's "bounded pool — default 5").
    pub fanout_pool_size: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            election: ElectionTimeoutRange { min: Duration::from_millis(150), max: Duration::from_millis(300) },
            tick_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(20),
            rpc_timeout: Duration::from_millis(100),
            fanout_pool_size: 5,
        }
    }
}

/// Everything a single node mutates behind the one lock: node/timer state,
/// the log, the interpreter, and the table of results awaiting a waiting
/// client (spec §5's single `Mutex`-protected aggregate).
pub struct SharedState {
    pub node: NodeState,
    pub log: Log,
    pub state_machine: StateMachine,
    pub results: std::collections::HashMap<String, CommandResult>,
}

impl SharedState {
    fn new(id: u64, now: Instant, timeouts: &ElectionTimeoutRange) -> Self {
        SharedState {
            node: NodeState::new(id, now, timeouts),
            log: Log::new(),
            state_machine: StateMachine::new(),
            results: std::collections::HashMap::new(),
        }
    }
}

pub struct Core {
    pub id: u64,
    pub peers: Vec<u64>,
    pub timeouts: TimeoutConfig,
    pub state: Mutex<SharedState>,
    pub applied_notify: Notify,
    /// Bounds concurrent outbound peer RPCs per election/replication round
    /// to `timeouts.fanout_pool_size` (spec §5).
    pub fanout_semaphore: Semaphore,
}

impl Core {
    pub fn new(id: u64, peers: Vec<u64>, timeouts: TimeoutConfig) -> Self {
        Core {
            state: Mutex::new(SharedState::new(id, Instant::now(), &timeouts.election)),
            id,
            peers,
            fanout_semaphore: Semaphore::new(timeouts.fanout_pool_size.max(1)),
            timeouts,
            applied_notify: Notify::new(),
        }
    }

    pub fn total_nodes(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn majority(&self) -> usize {
        self.total_nodes() / 2 + 1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not the leader")]
    NotLeader { leader_hint: Option<u64> },
}

/// Drives one node: election timer, heartbeat/replication, commit
/// advancement, and applying committed entries to the state machine.
/// Generalizes `jteplitz602-Rusty-Raft`'s peer-thread fan-out and
/// `dennisss-repo`'s `cycle` driver into a single `tokio::spawn`ed tick
/// loop over a shared `Transport`.
pub struct ConsensusEngine {
    pub core: Arc<Core>,
    pub transport: Arc<dyn Transport>,
}

impl ConsensusEngine {
    pub fn new(core: Arc<Core>, transport: Arc<dyn Transport>) -> Self {
        ConsensusEngine { core, transport }
    }

    /// The main driver loop. Ticks at a fixed interval for as long as the
    /// engine is alive; cancelled by dropping the `JoinHandle` this was
    /// spawned under.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.core.timeouts.tick_interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let (role, expired, heartbeat_due) = {
            let state = self.core.state.lock().await;
            let now = Instant::now();
            (
                state.node.role,
                state.node.election_timer_expired(now),
                state.node.heartbeat_due(now, self.core.timeouts.heartbeat_interval),
            )
        };
        match role {
            Role::Leader if heartbeat_due => {
                self.replicate_once().await;
                self.advance_commit().await;
            }
            Role::Leader => {}
            _ if expired => self.run_election().await,
            _ => {}
        }
        self.apply_pending().await;
    }

    /// Runs one candidacy to completion: bump term, vote for self, fan out
    /// `RequestVote` to every peer, and become leader on a majority of
    /// grants. A single-node cluster wins immediately (spec §4.4.1).
    async fn run_election(&self) {
        let (req, deadline) = {
            let mut state = self.core.state.lock().await;
            state.node.become_candidate(Instant::now(), &self.core.timeouts.election);
            info!(node = self.core.id, term = state.node.term, "starting election");
            let req = RequestVoteRequest {
                term: state.node.term,
                candidate_id: self.core.id,
                last_log_index: state.log.last_index(),
                last_log_term: state.log.last_term(),
            };
            (req, Instant::now() + state.node.election_timeout)
        };

        if self.core.peers.is_empty() {
            let mut state = self.core.state.lock().await;
            if state.node.role == Role::Candidate && state.node.term == req.term {
                let last_index = state.log.last_index();
                let now = Instant::now();
                state.node.become_leader(now, self.core.timeouts.heartbeat_interval, last_index, &self.core.peers);
                info!(node = self.core.id, term = req.term, "elected leader (single-node cluster)");
            }
            return;
        }

        let mut votes = 1usize; // self-vote
        // Each peer future holds one fan-out permit for its whole lifetime
        // (bounding concurrency to `fanout_pool_size`) and, on a transport
        // error or timeout, re-submits the RPC until the election timer
        // expires (spec §4.4.1).
        let replies = join_all(self.core.peers.iter().map(|&peer| {
            let transport = self.transport.clone();
            let req = req.clone();
            let rpc_timeout = self.core.timeouts.rpc_timeout;
            let semaphore = &self.core.fanout_semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                loop {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(rpc_timeout.min(remaining), transport.request_vote(peer, req.clone()))
                        .await
                    {
                        Ok(Ok(reply)) => return Some(reply),
                        Ok(Err(e)) => {
                            debug!(peer, error = %e, "request_vote failed, retrying before election deadline");
                        }
                        Err(_) => {
                            debug!(peer, "request_vote timed out, retrying before election deadline");
                        }
                    }
                }
            }
        }))
        .await;

        for reply in replies.into_iter().flatten() {
            let mut state = self.core.state.lock().await;
            if state.node.adopt_term_if_newer(reply.term) {
                return;
            }
            if state.node.role != Role::Candidate || state.node.term != req.term {
                return;
            }
            if reply.vote {
                votes += 1;
                if votes >= self.core.majority() {
                    let last_index = state.log.last_index();
                    let now = Instant::now();
                    state.node.become_leader(now, self.core.timeouts.heartbeat_interval, last_index, &self.core.peers);
                    info!(node = self.core.id, term = req.term, votes, "elected leader");
                    return;
                }
            }
        }
    }

    /// RequestVote RPC handler. Log-recency is checked first, against the
    /// receiver's *current* log, before any term-adoption side effects —
    /// ordering matters because adopting a newer term must not short-circuit
    /// a rejection that a stale log would otherwise earn.
    pub async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteReply {
        let mut state = self.core.state.lock().await;

        let own_last_term = state.log.last_term();
        let own_last_index = state.log.last_index();

        if req.last_log_term < own_last_term
            || (req.last_log_term == own_last_term && req.last_log_index < own_last_index)
        {
            return RequestVoteReply { vote: false, term: state.node.term };
        }

        if state.node.role == Role::Leader && req.term == state.node.term {
            return RequestVoteReply { vote: false, term: state.node.term };
        }

        if req.term > state.node.term {
            state.node.adopt_term_if_newer(req.term);
            state.node.voted_for = Some(req.candidate_id);
            state.node.reset_election_timer(Instant::now(), &self.core.timeouts.election);
            return RequestVoteReply { vote: true, term: state.node.term };
        }

        if req.term == state.node.term
            && (state.node.voted_for.is_none() || state.node.voted_for == Some(req.candidate_id))
        {
            state.node.voted_for = Some(req.candidate_id);
            state.node.reset_election_timer(Instant::now(), &self.core.timeouts.election);
            return RequestVoteReply { vote: true, term: state.node.term };
        }

        RequestVoteReply { vote: false, term: state.node.term }
    }

    /// AppendEntries RPC handler (also serves as the heartbeat when
    /// `entry` is `None`). `votedFor` is cleared only on a strict term
    /// increase, never on an equal-term heartbeat from the current leader
    /// (Open Question #2).
    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesReply {
        let mut state = self.core.state.lock().await;

        if req.term < state.node.term {
            return AppendEntriesReply { success: false, term: state.node.term };
        }

        state.node.adopt_term_if_newer(req.term);
        state.node.role = Role::Follower;
        state.node.leader_hint = Some(req.leader_id);
        state.node.reset_election_timer(Instant::now(), &self.core.timeouts.election);

        if req.prev_log_index >= 0 {
            match state.log.entry_at(req.prev_log_index) {
                Some(entry) if entry.term as i64 == req.prev_log_term => {}
                _ => return AppendEntriesReply { success: false, term: state.node.term },
            }
        } else if req.prev_log_index != NONE_INDEX {
            return AppendEntriesReply { success: false, term: state.node.term };
        }

        if let Some(entry_wire) = req.entry {
            let entry = match LogEntry::try_from(entry_wire) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "rejecting append_entries with malformed entry");
                    return AppendEntriesReply { success: false, term: state.node.term };
                }
            };
            let target_index = req.prev_log_index + 1;

            if let Some(existing) = state.log.entry_at(target_index) {
                if existing.term != entry.term || existing.command != entry.command {
                    state.log.truncate_from(target_index);
                    state.log.append(entry);
                }
            } else if state.log.size() == target_index {
                state.log.append(entry);
            } else {
                return AppendEntriesReply { success: false, term: state.node.term };
            }
        }

        let last_index = state.log.last_index();
        state.log.commit(req.leader_commit.min(last_index));

        AppendEntriesReply { success: true, term: state.node.term }
    }

    /// Leader-side replication fan-out: one `AppendEntries` per peer per
    /// heartbeat round, carrying at most one new entry (or none, as a
    /// heartbeat). Bounded to `fanout_pool_size` concurrent outbound RPCs
    /// (spec §5).
    async fn replicate_once(&self) {
        let (id, term, leader_commit, peers_snapshot) = {
            let mut state = self.core.state.lock().await;
            if state.node.role != Role::Leader {
                return;
            }
            state.node.mark_replicated(Instant::now());
            let mut snapshot = Vec::new();
            for &peer in &self.core.peers {
                let next_index = *state.node.next_index.get(&peer).unwrap_or(&0);
                let prev_log_index = next_index - 1;
                let prev_log_term = if prev_log_index >= 0 {
                    state.log.entry_at(prev_log_index).map(|e| e.term as i64).unwrap_or(NONE_INDEX)
                } else {
                    NONE_INDEX
                };
                let entry = state.log.entry_at(next_index).map(|e| (next_index, LogEntryWire::from(e)));
                snapshot.push((peer, prev_log_index, prev_log_term, entry));
            }
            (self.core.id, state.node.term, state.log.committed_index(), snapshot)
        };

        let rpc_timeout = self.core.timeouts.rpc_timeout;
        let results = join_all(peers_snapshot.into_iter().map(|(peer, prev_log_index, prev_log_term, entry)| {
            let transport = self.transport.clone();
            let semaphore = &self.core.fanout_semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("fanout semaphore is never closed");
                let sent_next_index = entry.as_ref().map(|(idx, _)| *idx);
                let req = AppendEntriesRequest {
                    term,
                    leader_id: id,
                    prev_log_index,
                    prev_log_term,
                    entry: entry.map(|(_, w)| w),
                    leader_commit,
                };
                let reply = tokio::time::timeout(rpc_timeout, transport.append_entries(peer, req)).await;
                (peer, sent_next_index, reply)
            }
        }))
        .await;

        let mut state = self.core.state.lock().await;
        if state.node.role != Role::Leader || state.node.term != term {
            return;
        }
        for (peer, sent_next_index, reply) in results {
            let reply = match reply {
                Ok(Ok(r)) => r,
                Ok(Err(TransportError::Unreachable(_))) | Ok(Err(TransportError::Timeout)) | Err(_) => continue,
                Ok(Err(TransportError::Malformed(msg))) => {
                    debug!(peer, error = %msg, "malformed append_entries reply");
                    continue;
                }
            };
            if reply.term > state.node.term {
                state.node.adopt_term_if_newer(reply.term);
                return;
            }
            if reply.success {
                if let Some(sent) = sent_next_index {
                    state.node.match_index.insert(peer, sent);
                    state.node.next_index.insert(peer, sent + 1);
                } else if let Some(current) = state.node.next_index.get(&peer).copied() {
                    state.node.match_index.insert(peer, current - 1);
                }
            } else {
                let current = state.node.next_index.get(&peer).copied().unwrap_or(0);
                state.node.next_index.insert(peer, (current - 1).max(0));
            }
        }
    }

    /// Advances `committed_index` to the highest `N` with a majority of
    /// `match_index[peer] >= N` whose entry was written in the current
    /// term (Raft's commitment rule — never commit a prior-term entry by
    /// counting replicas alone).
    async fn advance_commit(&self) {
        let mut state = self.core.state.lock().await;
        if state.node.role != Role::Leader {
            return;
        }
        let majority = self.core.majority();
        let own_term = state.node.term;
        let last_index = state.log.last_index();
        let start = state.log.committed_index() + 1;

        let mut candidate = None;
        for n in start..=last_index {
            let entry_term = match state.log.entry_at(n) {
                Some(e) => e.term,
                None => continue,
            };
            if entry_term != own_term {
                continue;
            }
            let mut count = 1; // self
            for &peer in &self.core.peers {
                if state.node.match_index.get(&peer).copied().unwrap_or(NONE_INDEX) >= n {
                    count += 1;
                }
            }
            if count >= majority {
                candidate = Some(n);
            }
        }

        if let Some(n) = candidate {
            state.log.commit(n);
        }
    }

    /// Applies every committed-but-unapplied entry in order, recording each
    /// result for a waiting client and waking anyone blocked in `propose`.
    /// A panicking `StateMachine::apply` is caught so `applied_index` keeps
    /// advancing lock-step with `committed_index` even on an apply bug
    /// (spec §7e).
    async fn apply_pending(&self) {
        loop {
            let advanced = {
                let mut state = self.core.state.lock().await;
                match state.log.apply_next() {
                    Some((_, entry)) => {
                        let id = entry.command.id().to_string();
                        let state_machine = &mut state.state_machine;
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| state_machine.apply(&entry.command)))
                            .unwrap_or_else(|_| CommandResult::Error { error: "state machine panicked".to_string() });
                        state.results.insert(id, result);
                        true
                    }
                    None => false,
                }
            };
            if !advanced {
                break;
            }
            self.core.applied_notify.notify_waiters();
        }
    }

    /// Client entry point: proposes a command for commitment and returns
    /// once it has been applied, or fails fast if this node is not the
    /// leader (spec §4.5's permitted non-leader short-circuit).
    pub async fn propose(&self, build: impl FnOnce(String) -> Command) -> Result<CommandResult, ClientError> {
        let (index, id) = {
            let mut state = self.core.state.lock().await;
            if state.node.role != Role::Leader {
                return Err(ClientError::NotLeader { leader_hint: state.node.leader_hint });
            }
            let id = Uuid::new_v4().to_string();
            let command = build(id.clone());
            let term = state.node.term;
            let index = state.log.append(LogEntry { term, command });
            (index, id)
        };

        loop {
            {
                let state = self.core.state.lock().await;
                if state.log.applied_index() >= index {
                    if let Some(result) = state.results.get(&id) {
                        return Ok(result.clone());
                    }
                }
            }
            let notified = self.core.applied_notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    }
}

/// Lets the in-memory test transport dispatch RPCs straight into another
/// in-process engine's handlers, bypassing sockets entirely.
#[async_trait::async_trait]
impl InMemoryPeer for ConsensusEngine {
    async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteReply {
        ConsensusEngine::handle_request_vote(self, req).await
    }

    async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesReply {
        ConsensusEngine::handle_append_entries(self, req).await
    }
}
