//! Peer RPC transport: a trait so the consensus engine can be driven by a
//! real HTTP client in production and an in-memory router in tests,
//! without the engine ever knowing the difference. Grounded in the
//! teacher's `AppState`-held `reqwest::Client` (see `main.rs`/`config.rs`)
//! generalized into a seam, per SPEC_FULL.md's ambient test-tooling
//! section.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::wire::{AppendEntriesReply, AppendEntriesRequest, NodeAddr, RequestVoteReply, RequestVoteRequest};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("peer request timed out")]
    Timeout,
    #[error("malformed peer response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(&self, peer: u64, req: RequestVoteRequest) -> Result<RequestVoteReply, TransportError>;

    async fn append_entries(
        &self,
        peer: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError>;
}

/// Real network transport. One shared `reqwest::Client` per node (teacher's
/// `AppState.http_client` pattern), addressed by peer id through a static
/// lookup table built from the cluster file at startup.
pub struct HttpTransport {
    client: reqwest::Client,
    peers: HashMap<u64, NodeAddr>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, peers: HashMap<u64, NodeAddr>) -> Self {
        HttpTransport { client, peers }
    }

    fn base_url(&self, peer: u64) -> Result<String, TransportError> {
        self.peers
            .get(&peer)
            .map(|addr| addr.base_url())
            .ok_or_else(|| TransportError::Unreachable(format!("no address configured for node {peer}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request_vote(&self, peer: u64, req: RequestVoteRequest) -> Result<RequestVoteReply, TransportError> {
        let url = format!("{}/election/vote", self.base_url(peer)?);
        let resp = self
            .client
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        resp.json::<RequestVoteReply>().await.map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn append_entries(
        &self,
        peer: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        let url = format!("{}/logs/append", self.base_url(peer)?);
        let resp = self
            .client
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        resp.json::<AppendEntriesReply>().await.map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// A handler a node registers with the in-memory bus so peers can reach it
/// without sockets. Mirrors the two peer-facing engine methods exactly.
#[async_trait]
pub trait InMemoryPeer: Send + Sync {
    async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteReply;
    async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesReply;
}

/// Test-only transport that dispatches directly into other in-process
/// engines, optionally simulating partitions and per-peer latency. Used by
/// the multi-node integration harness so elections and replication run
/// deterministically without real sockets.
#[derive(Default)]
pub struct InMemoryTransport {
    peers: Mutex<HashMap<u64, Arc<dyn InMemoryPeer>>>,
    partitioned: Mutex<std::collections::HashSet<u64>>,
    latency: Option<Duration>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        InMemoryTransport { peers: Mutex::new(HashMap::new()), partitioned: Mutex::new(Default::default()), latency: None }
    }

    pub async fn register(&self, id: u64, peer: Arc<dyn InMemoryPeer>) {
        self.peers.lock().await.insert(id, peer);
    }

    /// Simulates a network partition: RPCs to/from `id` fail until rejoined.
    pub async fn partition(&self, id: u64) {
        self.partitioned.lock().await.insert(id);
    }

    pub async fn heal(&self, id: u64) {
        self.partitioned.lock().await.remove(&id);
    }

    async fn reachable(&self, peer: u64) -> bool {
        !self.partitioned.lock().await.contains(&peer)
    }

    async fn delay(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn request_vote(&self, peer: u64, req: RequestVoteRequest) -> Result<RequestVoteReply, TransportError> {
        // A partition isolates a node in both directions: neither its
        // outbound RPCs nor RPCs addressed to it are delivered.
        if !self.reachable(peer).await || !self.reachable(req.candidate_id).await {
            return Err(TransportError::Unreachable(format!("node {peer} partitioned")));
        }
        self.delay().await;
        let handler = self
            .peers
            .lock()
            .await
            .get(&peer)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(format!("no such node {peer}")))?;
        Ok(handler.handle_request_vote(req).await)
    }

    async fn append_entries(
        &self,
        peer: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        if !self.reachable(peer).await || !self.reachable(req.leader_id).await {
            return Err(TransportError::Unreachable(format!("node {peer} partitioned")));
        }
        self.delay().await;
        let handler = self
            .peers
            .lock()
            .await
            .get(&peer)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(format!("no such node {peer}")))?;
        Ok(handler.handle_append_entries(req).await)
    }
}
