// Counting join: the finalizer waits until every party has arrived.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct JoinState {
    remaining: AtomicUsize,
    all_arrived: Notify,
}

/// One participant of a `CompletionJoin`. It arrives exactly once, when dropped.
pub struct JoinParty {
    state: Arc<JoinState>,
}

impl JoinParty {
    pub fn arrive(self) {}
}

impl Drop for JoinParty {
    fn drop(&mut self) {
        if self.state.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.all_arrived.notify_one();
        }
    }
}

/// The waiting side of the join.
pub struct CompletionJoin {
    state: Arc<JoinState>,
}

impl CompletionJoin {
    /// A join over `parties` participants.
    pub fn new(parties: usize) -> (Self, Vec<JoinParty>) {
        let state = Arc::new(JoinState { remaining: AtomicUsize::new(parties), all_arrived: Notify::new() });
        let members = (0..parties).map(|_| JoinParty { state: state.clone() }).collect();
        (Self { state }, members)
    }

    pub fn remaining(&self) -> usize {
        self.state.remaining.load(Ordering::Acquire)
    }

    /// Resolve once every party has arrived.
    pub async fn wait(self) {
        while self.remaining() > 0 {
            self.state.all_arrived.notified().await;
        }
    }
}
