//! Progress events emitted by sessions, oracles, the attack and the analyzers.
use crate::trace::Direction;
use crate::workflow::State;
use log::{debug, info};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged {
        from: State,
        to: State,
    },
    TraceAppended {
        state: State,
        direction: Direction,
        summary: String,
        continued: bool,
    },
    OracleQuery {
        count: u64,
        conformant: bool,
    },
    AttackProgress {
        iteration: u64,
        intervals: usize,
        queries: u64,
        /// Bit length of the widest remaining interval.
        width_bits: u64,
    },
    Score {
        implementation: String,
        score: u32,
    },
}

/// Sink for `Event`s. Shared between worker threads, hence `Send + Sync`.
pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: Event) {
        match event {
            Event::StateChanged { from, to } => debug!("State {from} -> {to}"),
            Event::TraceAppended {
                state,
                direction,
                summary,
                continued,
            } => {
                let continued = if continued { " (continued)" } else { "" };
                debug!("{direction:?} {summary} in {state}{continued}");
            }
            Event::OracleQuery { count, conformant } => {
                if count % 1000 == 0 {
                    info!("{count} oracle queries, last answer conformant: {conformant}");
                }
            }
            Event::AttackProgress {
                iteration,
                intervals,
                queries,
                width_bits,
            } => info!(
                "Iteration {iteration}: {intervals} interval(s), widest {width_bits} bits, {queries} queries"
            ),
            Event::Score {
                implementation,
                score,
            } => info!("{implementation}: {score}"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<Event>>,
}

impl MemoryReporter {
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
