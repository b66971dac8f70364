pub mod relay;
pub mod transcript_store;

pub use relay::{AnalysisRelay, AnalysisSummary, RelayError};
pub use transcript_store::TranscriptStore;
