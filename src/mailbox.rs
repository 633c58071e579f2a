use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A message for a long-running worker: ordered string parts, handed to
/// the script's message handler as its arguments in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    parts: Vec<String>,
}

impl Message {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl From<Vec<String>> for Message {
    fn from(parts: Vec<String>) -> Self {
        Self { parts }
    }
}

/// FIFO queue of pending messages, unbounded.
///
/// Not internally synchronized: the mailbox lives inside the worker's
/// locked state and every access happens under that lock, so the
/// emptiness check and the condvar wait stay in one critical section.
#[derive(Debug, Default)]
pub struct Mailbox {
    queue: VecDeque<Message>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the back of the queue.
    pub fn push(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    /// Remove and return the oldest message.
    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let mut mb = Mailbox::new();
        mb.push(Message::new(["first"]));
        mb.push(Message::new(["second"]));
        mb.push(Message::new(["third"]));

        assert_eq!(mb.len(), 3);
        assert_eq!(mb.pop(), Some(Message::new(["first"])));
        assert_eq!(mb.pop(), Some(Message::new(["second"])));
        assert_eq!(mb.pop(), Some(Message::new(["third"])));
        assert!(mb.is_empty());
        assert_eq!(mb.pop(), None);
    }

    #[test]
    fn message_preserves_part_order() {
        let m = Message::new(["a", "b", "c"]);
        assert_eq!(m.parts(), ["a", "b", "c"]);
    }
}
