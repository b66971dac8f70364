pub mod probe_run;

pub use probe_run::{execute_probe_run, ProbeError};
