use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use super::envelope::{Envelope, SignalType};
use super::participant::ConnectionState;

/// Result of handing an envelope to a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting an older envelope of the given type
    Evicted(SignalType),
    /// Queue full of envelopes that must not be lost, so this one was dropped
    Dropped,
    Closed,
}

struct LinkState {
    control: VecDeque<(u64, Envelope)>,
    data: VecDeque<(u64, Envelope)>,
    next_seq: u64,
    closed: bool,
    dropped: u64,
    connection: ConnectionState,
    last_seen: Instant,
}

impl LinkState {
    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn pop(&mut self) -> Option<Envelope> {
        let control_first = match (self.control.front(), self.data.front()) {
            (Some((c, _)), Some((d, _))) => c < d,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let lane = if control_first {
            &mut self.control
        } else {
            &mut self.data
        };
        lane.pop_front().map(|(_, envelope)| envelope)
    }
}

/// Outbound side of one participant connection.
///
/// Data envelopes go through a bounded FIFO. Control envelopes (`welcome`,
/// `rejected`, `user_joined`, `user_left`, `session_ended`) use an unbounded
/// lane that is never evicted. Both lanes share one sequence, so the writer
/// sees envelopes in push order. Pushing never blocks the sender.
///
/// Only candidates, chat and hand raises are ever evicted. An offer or
/// answer arriving at a full queue with nothing evictable is queued past
/// the bound.
pub struct PeerLink {
    state: Mutex<LinkState>,
    ready: Notify,
    closed_tx: watch::Sender<bool>,
    capacity: usize,
}

impl PeerLink {
    pub fn new(capacity: usize) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(LinkState {
                control: VecDeque::new(),
                data: VecDeque::with_capacity(capacity),
                next_seq: 0,
                closed: false,
                dropped: 0,
                connection: ConnectionState::Connecting,
                last_seen: Instant::now(),
            }),
            ready: Notify::new(),
            closed_tx,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, envelope: Envelope) -> PushOutcome {
        if envelope.kind.is_control() {
            return self.push_control(envelope);
        }

        let mut state = self.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if state.data.len() >= self.capacity {
            // stale candidates go first, then chat and hand raises
            let victim = state
                .data
                .iter()
                .position(|(_, queued)| queued.kind == SignalType::Candidate)
                .or_else(|| {
                    state
                        .data
                        .iter()
                        .position(|(_, queued)| queued.kind.is_evictable())
                });
            match victim.and_then(|index| state.data.remove(index)) {
                Some((_, evicted)) => {
                    state.dropped += 1;
                    outcome = PushOutcome::Evicted(evicted.kind);
                    tracing::debug!(
                        evicted = ?evicted.kind,
                        dropped_total = state.dropped,
                        "Outbound queue full, evicted envelope"
                    );
                }
                None if envelope.kind.is_evictable() => {
                    state.dropped += 1;
                    tracing::debug!(
                        dropped = ?envelope.kind,
                        dropped_total = state.dropped,
                        "Outbound queue full of negotiation traffic, dropped envelope"
                    );
                    return PushOutcome::Dropped;
                }
                None => {}
            }
        }
        let seq = state.take_seq();
        state.data.push_back((seq, envelope));
        drop(state);

        self.ready.notify_one();
        outcome
    }

    pub fn push_control(&self, envelope: Envelope) -> PushOutcome {
        let mut state = self.lock();
        if state.closed {
            return PushOutcome::Closed;
        }
        let seq = state.take_seq();
        state.control.push_back((seq, envelope));
        drop(state);

        self.ready.notify_one();
        PushOutcome::Queued
    }

    /// Next envelope for the writer, in push order. Returns `None` once the
    /// link is closed and the control lane is flushed.
    pub async fn next(&self) -> Option<Envelope> {
        loop {
            {
                let mut state = self.lock();
                if let Some(envelope) = state.pop() {
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    /// Closes the link. Pending data is discarded, pending control envelopes
    /// are still delivered. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.data.clear();
        state.connection = ConnectionState::Disconnected;
        drop(state);

        self.ready.notify_one();
        self.closed_tx.send_replace(true);
        true
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Moves the presence state forward; illegal steps are refused
    pub fn advance(&self, next: ConnectionState) -> bool {
        let mut state = self.lock();
        if state.connection.can_advance_to(next) {
            state.connection = next;
            true
        } else {
            false
        }
    }

    pub fn touch(&self) {
        self.lock().last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.lock().last_seen)
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.control.len() + state.data.len()
    }
}
