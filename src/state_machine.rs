//! The deterministic interpreter of committed commands: a topic-name to
//! FIFO-queue mapping (`BTreeMap` rather than `HashMap` so that
//! `ListTopics` is deterministic across replicas without an extra sort,
//! per spec §4.2's ordering requirement).

use std::collections::{BTreeMap, VecDeque};

use crate::command::{Command, CommandResult};

#[derive(Debug, Default)]
pub struct StateMachine {
    topics: BTreeMap<String, VecDeque<String>>,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine { topics: BTreeMap::new() }
    }

    /// Local introspection of the current topic set, independent of the
    /// `ListTopics` command/log path. Used by callers (tests, `/status`-style
    /// diagnostics) that want a replica's local view without proposing a
    /// read through consensus.
    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Applies `command`, mutating local state and producing the result
    /// that the Client API will hand back to the caller. Pure with respect
    /// to (state, command): same starting state + same command always
    /// yields the same result and the same ending state.
    pub fn apply(&mut self, command: &Command) -> CommandResult {
        match command {
            Command::CreateTopic { topic, .. } => {
                if self.topics.contains_key(topic) {
                    CommandResult::CreateTopic { success: false }
                } else {
                    self.topics.insert(topic.clone(), VecDeque::new());
                    CommandResult::CreateTopic { success: true }
                }
            }
            Command::ListTopics { .. } => {
                CommandResult::ListTopics { success: true, topics: self.topics.keys().cloned().collect() }
            }
            Command::Enqueue { topic, message, .. } => match self.topics.get_mut(topic) {
                Some(queue) => {
                    queue.push_back(message.clone());
                    CommandResult::Enqueue { success: true }
                }
                None => CommandResult::Enqueue { success: false },
            },
            Command::Dequeue { topic, .. } => match self.topics.get_mut(topic) {
                Some(queue) if !queue.is_empty() => {
                    let message = queue.pop_front();
                    CommandResult::Dequeue { success: true, message }
                }
                _ => CommandResult::Dequeue { success: false, message: None },
            },
        }
    }
}
