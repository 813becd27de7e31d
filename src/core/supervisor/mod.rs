//! Validator process lifecycle: spawn, readiness, stop, reset and the
//! durable record that lets later invocations see what is running.

mod hooks;
mod launcher;
mod lock;
pub mod log_rotation;
mod manager;
pub mod probe;
mod record;

pub use launcher::{build_args, ExitInfo};
pub use lock::SupervisorLock;
pub use manager::{
    ProcessSupervisor, StartInfo, StartOptions, ValidatorStatus, READINESS_POLL_INTERVAL,
};
pub use probe::{ProcessProbe, ProcessUsage};
pub use record::{ProcessRecord, ProcessRecordStore};
