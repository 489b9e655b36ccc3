// One run of a codeblock: identity, lifecycle state and process group.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use fencerun_common::types::DocumentHandle;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created,
    Starting,
    Running,
    Draining,
    Finalizing,
    Done,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Lifecycle {
    state: ExecutionState,
    process_group: Option<Pid>,
}

pub struct Execution {
    id: String,
    run_id: Uuid,
    document: DocumentHandle,
    stop_signal: Signal,
    lifecycle: Mutex<Lifecycle>,
}

impl Execution {
    pub fn new(id: impl Into<String>, document: DocumentHandle, stop_signal: Signal) -> Self {
        Self {
            id: id.into(),
            run_id: Uuid::new_v4(),
            document,
            stop_signal,
            lifecycle: Mutex::new(Lifecycle { state: ExecutionState::Created, process_group: None }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn document(&self) -> DocumentHandle {
        self.document
    }

    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    /// Move forward to `next`. Terminal states are final and the lifecycle
    /// never goes backwards.
    pub fn advance(&self, next: ExecutionState) {
        let mut lifecycle = self.lock();
        if lifecycle.state.is_terminal() || (next <= lifecycle.state && next != ExecutionState::Failed) {
            return;
        }
        debug!(id = %self.id, run_id = %self.run_id, from = %lifecycle.state, to = %next, "execution state");
        lifecycle.state = next;
    }

    /// Record the spawned process; its pid is the id of its process group.
    pub fn mark_spawned(&self, pid: u32) {
        {
            let mut lifecycle = self.lock();
            lifecycle.process_group = i32::try_from(pid).ok().map(Pid::from_raw);
        }
        self.advance(ExecutionState::Running);
    }

    /// Signal the whole process group with the configured stop signal.
    pub fn kill(&self) -> Result<(), EngineError> {
        let process_group = {
            let lifecycle = self.lock();
            match lifecycle.process_group {
                Some(pgid) if !lifecycle.state.is_terminal() => pgid,
                _ => return Err(EngineError::NotStarted { id: self.id.clone() }),
            }
        };

        info!(id = %self.id, pgid = process_group.as_raw(), signal = %self.stop_signal, "signalling process group");
        match killpg(process_group, self.stop_signal) {
            // The group already exited; finalization will follow.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(EngineError::Internal(format!("failed to signal process group: {errno}"))),
        }
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("run_id", &self.run_id)
            .field("document", &self.document)
            .field("state", &self.state())
            .finish()
    }
}
