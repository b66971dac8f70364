pub mod api;
pub mod core;
pub mod features;
pub mod probe;
pub mod scraping;
pub mod tools;

pub use core::types;
pub use core::types::*;
pub use core::AppState;

pub use features::{relay, transcript_store};
pub use tools::probe_run;
