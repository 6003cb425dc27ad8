//! Ordered log of every message a session sent or received.
use crate::display::to_hex;
use crate::workflow::{Message, State};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// State the session entered with this message.
    pub state: State,
    pub previous_state: State,
    pub direction: Direction,
    /// Message as sent or received, after any observer replaced it.
    pub message: Message,
    /// Wire bytes of the message. For handshake messages this is the
    /// message with its 4-byte header, otherwise the record fragment.
    pub raw: Vec<u8>,
    /// Original message when an observer replaced it.
    pub previous: Option<Message>,
    /// Not the first message taken from its record.
    pub continued: bool,
    /// Offset from the start of the session.
    pub elapsed: Duration,
}

impl TraceEntry {
    #[must_use]
    pub fn elapsed_nanos(&self) -> u128 {
        self.elapsed.as_nanos()
    }

    #[must_use]
    pub fn was_replaced(&self) -> bool {
        self.previous.is_some()
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Sent => "->",
            Direction::Received => "<-",
        };
        write!(
            f,
            "[{:>10.3}ms] {arrow} {:<26} {}",
            self.elapsed.as_secs_f64() * 1000.0,
            self.state.to_string(),
            self.message
        )?;
        if self.continued {
            write!(f, " (continued)")?;
        }
        if let Some(previous) = &self.previous {
            write!(f, " (replaced {previous})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MessageTrace {
    start: Instant,
    entries: Vec<TraceEntry>,
}

impl Default for MessageTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTrace {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            entries: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        state: State,
        previous_state: State,
        direction: Direction,
        message: Message,
        raw: Vec<u8>,
        previous: Option<Message>,
        continued: bool,
    ) -> &TraceEntry {
        self.entries.push(TraceEntry {
            state,
            previous_state,
            direction,
            message,
            raw,
            previous,
            continued,
            elapsed: self.start.elapsed(),
        });
        &self.entries[self.entries.len() - 1]
    }

    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// States in the order they were entered.
    #[must_use]
    pub fn states(&self) -> Vec<State> {
        self.entries.iter().map(|entry| entry.state).collect()
    }

    /// Hex dump of every entry, one per line.
    #[must_use]
    pub fn dump(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{entry}\n    {}", to_hex(&entry.raw)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
