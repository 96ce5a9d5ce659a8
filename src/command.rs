//! The command data model: what a client asks for, and what the state
//! machine hands back once it has been applied.

use serde::Serialize;

/// Operation codes carried on the wire (see `wire::CommandWire`). Kept
/// stable so that mixed-implementation clusters agree on framing.
pub const OP_GET_MESSAGE: i16 = 1;
pub const OP_PUT_MESSAGE: i16 = 2;
pub const OP_GET_TOPICS: i16 = 3;
pub const OP_PUT_TOPIC: i16 = 4;

/// An immutable, uniquely-identified request to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateTopic { id: String, topic: String },
    ListTopics { id: String },
    Enqueue { id: String, topic: String, message: String },
    Dequeue { id: String, topic: String },
}

impl Command {
    pub fn id(&self) -> &str {
        match self {
            Command::CreateTopic { id, .. } => id,
            Command::ListTopics { id } => id,
            Command::Enqueue { id, .. } => id,
            Command::Dequeue { id, .. } => id,
        }
    }

    pub fn operation_code(&self) -> i16 {
        match self {
            Command::CreateTopic { .. } => OP_PUT_TOPIC,
            Command::ListTopics { .. } => OP_GET_TOPICS,
            Command::Enqueue { .. } => OP_PUT_MESSAGE,
            Command::Dequeue { .. } => OP_GET_MESSAGE,
        }
    }
}

/// The outcome of applying a `Command` to the state machine. Serialized
/// directly into client-facing HTTP response bodies (see `http.rs`), so
/// its shape must match §6.3 of the spec exactly for each operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    CreateTopic {
        success: bool,
    },
    ListTopics {
        success: bool,
        topics: Vec<String>,
    },
    Enqueue {
        success: bool,
    },
    Dequeue {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A deterministic-apply failure that should never happen in a correct
    /// implementation (§7e); still recorded so `appliedIndex` advances.
    Error {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_codes_match_wire_contract() {
        assert_eq!(
            Command::CreateTopic { id: "1".into(), topic: "t".into() }.operation_code(),
            OP_PUT_TOPIC
        );
        assert_eq!(Command::ListTopics { id: "1".into() }.operation_code(), OP_GET_TOPICS);
        assert_eq!(
            Command::Enqueue { id: "1".into(), topic: "t".into(), message: "m".into() }
                .operation_code(),
            OP_PUT_MESSAGE
        );
        assert_eq!(
            Command::Dequeue { id: "1".into(), topic: "t".into() }.operation_code(),
            OP_GET_MESSAGE
        );
    }

    #[test]
    fn command_result_serializes_to_the_documented_shape() {
        let v = serde_json::to_value(CommandResult::Dequeue { success: true, message: Some("m1".into()) }).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "message": "m1"}));

        let v = serde_json::to_value(CommandResult::Dequeue { success: false, message: None }).unwrap();
        assert_eq!(v, serde_json::json!({"success": false}));
    }
}
