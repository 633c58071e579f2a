/// Unit of work a worker is constructed with - script source, a sequence
/// of sources, or a persistent script plus a message handler.
///
/// Exactly one variant is active per worker and it is immutable after
/// construction. The execution algorithm branches once on the tag; there
/// is no way to change the shape of a worker's work after the fact.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A single script, executed once.
    Single(String),
    /// An ordered sequence of scripts, executed in order, stopping at
    /// the first failure.
    Sequence(Vec<String>),
    /// A bootstrap script followed by the mailbox loop. `message_handler`
    /// names the script-defined function invoked for each inbound message.
    LongRunning {
        script: String,
        message_handler: String,
    },
}

impl Payload {
    /// Create a single-script payload
    pub fn single(script: impl Into<String>) -> Self {
        Self::Single(script.into())
    }

    /// Create a script-sequence payload
    pub fn sequence<I, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Sequence(scripts.into_iter().map(Into::into).collect())
    }

    /// Create a long-running payload: bootstrap script + handler name
    pub fn long_running(script: impl Into<String>, message_handler: impl Into<String>) -> Self {
        Self::LongRunning {
            script: script.into(),
            message_handler: message_handler.into(),
        }
    }

    /// Whether this payload keeps the worker alive for the mailbox loop
    /// after the initial script completes.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Self::LongRunning { .. })
    }

    /// Whether this is the sequence variant (the only one that populates
    /// `Worker::results()`).
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence(_))
    }
}

// Convenience: a bare string is a single-script payload
impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Single(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_fixed_at_construction() {
        assert!(!Payload::single("1 + 1").is_long_running());
        assert!(Payload::sequence(["a", "b"]).is_sequence());
        assert!(Payload::long_running("var x = 0", "onMessage").is_long_running());
    }

    #[test]
    fn from_str_is_single() {
        let p: Payload = "print('hi')".into();
        assert!(matches!(p, Payload::Single(_)));
    }
}
