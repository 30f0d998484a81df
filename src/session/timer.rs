//! Session timers.
//!
//! The session never sleeps. It records deadlines here and the owner calls
//! back into it once [`TimerTable::next_deadline`] has passed.

use std::time::{Duration, Instant};

use rand::Rng;

/// Timers a session can arm. Each kind has at most one pending deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Retransmit the in-flight message.
    Retry,
    /// Bound on the total time spent retrying one message.
    RetriesExhausted,
    /// Send the next Connect broadcast.
    Broadcast,
    /// Bound on the total time spent connecting.
    HandshakeTimeout,
    /// Restart a lost handshake.
    Reinit,
}

impl TimerKind {
    const ALL: [TimerKind; 5] = [
        TimerKind::Retry,
        TimerKind::RetriesExhausted,
        TimerKind::Broadcast,
        TimerKind::HandshakeTimeout,
        TimerKind::Reinit,
    ];

    fn index(self) -> usize {
        match self {
            TimerKind::Retry => 0,
            TimerKind::RetriesExhausted => 1,
            TimerKind::Broadcast => 2,
            TimerKind::HandshakeTimeout => 3,
            TimerKind::Reinit => 4,
        }
    }
}

/// Cancellable reference to a scheduled timer.
///
/// Handles are stamped with a generation, so cancelling an old handle never
/// touches a timer that was re-armed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    kind: TimerKind,
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    generation: u64,
    deadline: Instant,
}

/// Deadline table, one slot per [`TimerKind`].
#[derive(Debug, Default)]
pub struct TimerTable {
    slots: [Option<Armed>; 5],
    generation: u64,
}

impl TimerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire `after` from `now`, replacing any pending deadline.
    pub fn schedule(&mut self, kind: TimerKind, after: Duration, now: Instant) -> TimerHandle {
        self.generation += 1;
        self.slots[kind.index()] = Some(Armed {
            generation: self.generation,
            deadline: now + after,
        });
        TimerHandle {
            kind,
            generation: self.generation,
        }
    }

    /// Cancel the timer behind `handle` if it is still the armed one.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let slot = &mut self.slots[handle.kind.index()];
        match slot {
            Some(armed) if armed.generation == handle.generation => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever is armed for `kind`.
    pub fn cancel_kind(&mut self, kind: TimerKind) {
        self.slots[kind.index()] = None;
    }

    /// Cancel every timer.
    pub fn cancel_all(&mut self) {
        self.slots = [None; 5];
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|armed| armed.deadline).min()
    }

    /// Disarm and return every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn expire(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired: Vec<(Instant, TimerKind)> = Vec::new();
        for kind in TimerKind::ALL {
            let slot = &mut self.slots[kind.index()];
            if let Some(armed) = *slot {
                if armed.deadline <= now {
                    fired.push((armed.deadline, kind));
                    *slot = None;
                }
            }
        }
        fired.sort_by_key(|(deadline, _)| *deadline);
        fired.into_iter().map(|(_, kind)| kind).collect()
    }
}

/// `base` plus a random delay in `[0, jitter)`.
pub fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    base + rand::thread_rng().gen_range(Duration::ZERO..jitter)
}
