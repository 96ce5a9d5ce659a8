//! JSON wire shapes: cluster config addresses, peer RPC bodies, and the
//! client-facing request/response bodies served by `http.rs`. Kept as
//! plain serde structs separate from the internal `Command`/`LogEntry`
//! types so the wire contract can be pinned down independently of
//! internal representation changes.

use serde::{Deserialize, Serialize};

use crate::command::{self, Command};
use crate::log::LogEntry;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeAddr {
    pub ip: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

// --- Peer RPCs --------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: i64,
    pub last_log_term: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteReply {
    pub vote: bool,
    pub term: u64,
}

/// The `message` field's payload varies by `operation` (spec §6.2):
/// the topic name for `PUT_TOPIC`/`GET_MESSAGE`, a JSON-encoded
/// `{topic, message}` object for `PUT_MESSAGE`, or the empty string for
/// `GET_TOPICS`. `None` is only ever used for the heartbeat's absent entry,
/// never within a present `CommandWire`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandWire {
    pub id: String,
    pub operation: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The JSON shape carried inside `CommandWire::message` for `PUT_MESSAGE`.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct EnqueuePayload {
    topic: String,
    message: String,
}

impl From<&Command> for CommandWire {
    fn from(command: &Command) -> Self {
        match command {
            Command::CreateTopic { id, topic } => {
                CommandWire { id: id.clone(), operation: command::OP_PUT_TOPIC, message: Some(topic.clone()) }
            }
            Command::ListTopics { id } => {
                CommandWire { id: id.clone(), operation: command::OP_GET_TOPICS, message: Some(String::new()) }
            }
            Command::Enqueue { id, topic, message } => {
                let payload = EnqueuePayload { topic: topic.clone(), message: message.clone() };
                CommandWire {
                    id: id.clone(),
                    operation: command::OP_PUT_MESSAGE,
                    message: Some(serde_json::to_string(&payload).expect("EnqueuePayload always serializes")),
                }
            }
            Command::Dequeue { id, topic } => {
                CommandWire { id: id.clone(), operation: command::OP_GET_MESSAGE, message: Some(topic.clone()) }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandWireError {
    #[error("unknown operation code {0}")]
    UnknownOperation(i16),
    #[error("missing required field `{0}` for this operation")]
    MissingField(&'static str),
    #[error("malformed enqueue payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

impl TryFrom<CommandWire> for Command {
    type Error = CommandWireError;

    fn try_from(wire: CommandWire) -> Result<Self, Self::Error> {
        let message = || wire.message.clone().ok_or(CommandWireError::MissingField("message"));
        Ok(match wire.operation {
            command::OP_PUT_TOPIC => Command::CreateTopic { id: wire.id.clone(), topic: message()? },
            command::OP_GET_TOPICS => Command::ListTopics { id: wire.id.clone() },
            command::OP_PUT_MESSAGE => {
                let payload: EnqueuePayload = serde_json::from_str(&message()?)?;
                Command::Enqueue { id: wire.id.clone(), topic: payload.topic, message: payload.message }
            }
            command::OP_GET_MESSAGE => Command::Dequeue { id: wire.id.clone(), topic: message()? },
            other => return Err(CommandWireError::UnknownOperation(other)),
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogEntryWire {
    pub term: u64,
    pub command: CommandWire,
}

impl From<&LogEntry> for LogEntryWire {
    fn from(entry: &LogEntry) -> Self {
        LogEntryWire { term: entry.term, command: CommandWire::from(&entry.command) }
    }
}

impl TryFrom<LogEntryWire> for LogEntry {
    type Error = CommandWireError;

    fn try_from(wire: LogEntryWire) -> Result<Self, Self::Error> {
        Ok(LogEntry { term: wire.term, command: Command::try_from(wire.command)? })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: u64,
    pub prev_log_index: i64,
    pub prev_log_term: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<LogEntryWire>,
    pub leader_commit: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesReply {
    pub success: bool,
    pub term: u64,
}

// --- Client API --------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicRequest {
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageRequest {
    pub topic: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    /// Index of the last-known leader in the cluster file's address list,
    /// so a rejected client can retry against the right node (spec §4.5).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicListResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusResponse {
    pub role: String,
    pub term: u64,
}
