mod sweep;

pub use sweep::{SweepContext, SweepJob, process_sweep_job, sweep_schedule};
