//! Signal delivery: batching, failure quarantine and pruning.

pub mod batcher;
pub mod quarantine;


pub use batcher::SignalBatcher;
pub use quarantine::{
    FailurePolicy, MachineHealth, prune_failing_machines_signals, prune_sent_signals,
};
