//! Ownership of the assistant message that is currently being streamed.

/// `Absent -> Streaming -> Settled`, and back to `Streaming` for the next
/// reply. While streaming, the buffer is the single source of truth for the
/// target message's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PendingReply {
    #[default]
    Absent,
    Streaming {
        message_id: u32,
        buffer: String,
    },
    Settled {
        message_id: u32,
    },
}

impl PendingReply {
    /// Start streaming into `message_id`. Returns `false` if another reply is
    /// still streaming.
    pub fn begin(&mut self, message_id: u32) -> bool {
        if self.is_streaming() {
            return false;
        }
        *self = PendingReply::Streaming {
            message_id,
            buffer: String::new(),
        };
        true
    }

    /// Append a chunk and return the target id with the full buffer.
    pub fn push(&mut self, chunk: &str) -> Option<(u32, &str)> {
        match self {
            PendingReply::Streaming { message_id, buffer } => {
                buffer.push_str(chunk);
                Some((*message_id, buffer.as_str()))
            }
            _ => None,
        }
    }

    /// Finish streaming, returning the target id and the final content.
    pub fn settle(&mut self) -> Option<(u32, String)> {
        match std::mem::take(self) {
            PendingReply::Streaming { message_id, buffer } => {
                *self = PendingReply::Settled { message_id };
                Some((message_id, buffer))
            }
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, PendingReply::Streaming { .. })
    }

    /// Whether writes to `id` must be refused right now.
    pub fn blocks(&self, id: u32) -> bool {
        matches!(self, PendingReply::Streaming { message_id, .. } if *message_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut pending = PendingReply::default();
        assert!(!pending.blocks(3));
        assert_eq!(pending.push("x"), None);

        assert!(pending.begin(3));
        assert!(pending.blocks(3));
        assert!(!pending.blocks(2));
        assert!(!pending.begin(4));

        pending.push("Hel");
        assert_eq!(pending.push("lo"), Some((3, "Hello")));

        assert_eq!(pending.settle(), Some((3, "Hello".to_string())));
        assert_eq!(pending, PendingReply::Settled { message_id: 3 });
        assert!(!pending.blocks(3));
        assert_eq!(pending.settle(), None);

        assert!(pending.begin(5));
    }
}
