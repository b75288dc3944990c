//! Staggering policies for fan-out connections.
//!
//! A [`FanoutConnection`](super::fanout::FanoutConnection) starts with only
//! its first connection enabled. Each item produced by the escalation signal
//! enables exactly one more, in order.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// When additional connections of a fan-out become eligible.
pub enum Escalation {
    /// Only the first connection is ever used.
    Never,
    /// Every connection is enabled from the start.
    Immediate,
    /// Enable the second connection after `delay`, then one more every
    /// `interval`.
    Ticker { delay: Duration, interval: Duration },
    /// Caller-supplied signal; each item enables one more connection.
    Signal(BoxStream<'static, ()>),
}

impl Escalation {
    pub fn ticker(delay: Duration, interval: Duration) -> Self {
        Escalation::Ticker { delay, interval }
    }

    pub fn signal<S>(signal: S) -> Self
    where
        S: Stream<Item = ()> + Send + 'static,
    {
        Escalation::Signal(signal.boxed())
    }

    /// Number of connections enabled at construction time.
    pub(crate) fn initially_enabled(&self, total: usize) -> usize {
        match self {
            Escalation::Immediate => total,
            _ => total.min(1),
        }
    }

    /// The tick source, or `None` when no further escalation can happen.
    pub(crate) fn into_ticks(self) -> Option<BoxStream<'static, ()>> {
        match self {
            Escalation::Never | Escalation::Immediate => None,
            Escalation::Ticker { delay, interval } => {
                let first = Instant::now() + delay;
                let ticks = stream::unfold(first, move |at| async move {
                    tokio::time::sleep_until(at).await;
                    Some(((), at + interval))
                });
                Some(ticks.boxed())
            }
            Escalation::Signal(signal) => Some(signal),
        }
    }
}

impl fmt::Debug for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Escalation::Never => f.write_str("Never"),
            Escalation::Immediate => f.write_str("Immediate"),
            Escalation::Ticker { delay, interval } => f
                .debug_struct("Ticker")
                .field("delay", delay)
                .field("interval", interval)
                .finish(),
            Escalation::Signal(_) => f.write_str("Signal(..)"),
        }
    }
}
