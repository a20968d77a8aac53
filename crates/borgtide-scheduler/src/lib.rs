//! `borgtide-scheduler`: decides which backup runs when, and runs it.
//!
//! The [`Orchestrator`] is a single task that owns all scheduling state.
//! Network probes and borg invocations run on a bounded [`WorkerPool`] and
//! report back over a channel; at most one job is ever between host check
//! and completion. The [`control`] socket routes user actions from other
//! processes through that same admission check.

pub mod control;
pub mod error;
pub mod handle;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod timestamp;

pub use control::{ActionOutcome, ControlClient, ControlSocket, Reply};
pub use error::{Result, SchedulerError};
pub use handle::{Admission, OrchestratorHandle, UserAction};
pub use job::Job;
pub use orchestrator::{Backend, Orchestrator, Origin, Phase, QueueSnapshot, Settings};
pub use pool::WorkerPool;
pub use timestamp::TimestampFile;
