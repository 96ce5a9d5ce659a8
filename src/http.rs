//! Client and peer-facing HTTP surface. Router shape and `TraceLayer`
//! wiring follow the teacher's `create_app` (`main.rs`), narrowed from the
//! proxy's static-file/compression/CORS stack down to this broker's
//! client + peer routes (spec §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::command::{Command, CommandResult};
use crate::consensus::{ClientError, ConsensusEngine};
use crate::wire::{
    AppendEntriesReply, AppendEntriesRequest, MessageRequest, MessageResponse, RequestVoteReply,
    RequestVoteRequest, StatusResponse, SuccessResponse, TopicListResponse, TopicRequest,
};

pub fn create_app(engine: Arc<ConsensusEngine>) -> Router {
    Router::new()
        .route("/topic", post(create_topic).get(list_topics))
        .route("/message", post(put_message))
        .route("/message/:topic", get(get_message))
        .route("/status", get(status))
        .route("/election/vote", post(handle_vote))
        .route("/logs/append", post(handle_append))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            ),
        )
        .with_state(engine)
}

async fn create_topic(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<TopicRequest>,
) -> Json<SuccessResponse> {
    let topic = req.topic;
    match engine.propose(move |id| Command::CreateTopic { id, topic }).await {
        Ok(CommandResult::CreateTopic { success }) => Json(SuccessResponse { success, leader: None }),
        Ok(_) => Json(SuccessResponse { success: false, leader: None }),
        Err(ClientError::NotLeader { leader_hint }) => Json(SuccessResponse { success: false, leader: leader_hint }),
    }
}

async fn list_topics(State(engine): State<Arc<ConsensusEngine>>) -> Json<TopicListResponse> {
    match engine.propose(|id| Command::ListTopics { id }).await {
        Ok(CommandResult::ListTopics { success, topics }) => {
            Json(TopicListResponse { success, topics: Some(topics), leader: None })
        }
        Ok(_) => Json(TopicListResponse { success: false, topics: None, leader: None }),
        Err(ClientError::NotLeader { leader_hint }) => {
            Json(TopicListResponse { success: false, topics: None, leader: leader_hint })
        }
    }
}

async fn put_message(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<MessageRequest>,
) -> Json<SuccessResponse> {
    let MessageRequest { topic, message } = req;
    match engine.propose(move |id| Command::Enqueue { id, topic, message }).await {
        Ok(CommandResult::Enqueue { success }) => Json(SuccessResponse { success, leader: None }),
        Ok(_) => Json(SuccessResponse { success: false, leader: None }),
        Err(ClientError::NotLeader { leader_hint }) => Json(SuccessResponse { success: false, leader: leader_hint }),
    }
}

async fn get_message(
    State(engine): State<Arc<ConsensusEngine>>,
    Path(topic): Path<String>,
) -> Json<MessageResponse> {
    match engine.propose(move |id| Command::Dequeue { id, topic }).await {
        Ok(CommandResult::Dequeue { success, message }) => {
            Json(MessageResponse { success, message, leader: None })
        }
        Ok(_) => Json(MessageResponse { success: false, message: None, leader: None }),
        Err(ClientError::NotLeader { leader_hint }) => {
            Json(MessageResponse { success: false, message: None, leader: leader_hint })
        }
    }
}

/// Reads role/term directly, bypassing the log — this is diagnostic
/// information about the node itself, not a replicated read (spec §6.2).
async fn status(State(engine): State<Arc<ConsensusEngine>>) -> Json<StatusResponse> {
    let state = engine.core.state.lock().await;
    let role = match state.node.role {
        crate::node::Role::Follower => "follower",
        crate::node::Role::Candidate => "candidate",
        crate::node::Role::Leader => "leader",
    };
    Json(StatusResponse { role: role.to_string(), term: state.node.term })
}

async fn handle_vote(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<RequestVoteRequest>,
) -> Json<RequestVoteReply> {
    Json(engine.handle_request_vote(req).await)
}

async fn handle_append(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<AppendEntriesRequest>,
) -> Json<AppendEntriesReply> {
    Json(engine.handle_append_entries(req).await)
}
