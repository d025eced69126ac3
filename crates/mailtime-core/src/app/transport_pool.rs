//! TransportPool - transport の選択（backup / balancer）

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ports::Transport;

use super::config::Strategy;

pub struct TransportPool {
    transports: Vec<Arc<dyn Transport>>,
    strategy: Strategy,
    fails_to_next: u32,
    /// Round-robin cursor for `Strategy::Balancer`. Process-local.
    cursor: AtomicUsize,
}

impl TransportPool {
    pub fn new(transports: Vec<Arc<dyn Transport>>, strategy: Strategy, fails_to_next: u32) -> Self {
        Self {
            transports,
            strategy,
            fails_to_next: fails_to_next.max(1),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Transport>> {
        self.transports.get(index)
    }

    /// Index to use for this attempt.
    ///
    /// Balancer advances the shared cursor first and then uses it.
    /// Backup uses the index stored on the task.
    pub fn select(&self, task_transport_index: usize) -> usize {
        match self.strategy {
            Strategy::Balancer if !self.transports.is_empty() => {
                let len = self.transports.len();
                let previous = self
                    .cursor
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % len))
                    .unwrap_or(0);
                (previous + 1) % len
            }
            _ => task_transport_index,
        }
    }

    /// Index to store on a task rescheduled after its `attempts`-th attempt failed on `used`.
    ///
    /// Under backup the task moves on to the next transport every `fails_to_next` failures.
    pub fn after_failure(&self, used: usize, attempts: u32) -> usize {
        match self.strategy {
            Strategy::Backup if attempts % self.fails_to_next == 0 && !self.transports.is_empty() => {
                (used + 1) % self.transports.len()
            }
            _ => used,
        }
    }
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transports.iter().map(|t| t.name()).collect();
        f.debug_struct("TransportPool")
            .field("transports", &names)
            .field("strategy", &self.strategy)
            .field("fails_to_next", &self.fails_to_next)
            .finish()
    }
}
