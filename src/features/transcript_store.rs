//! Transcript persistence.
//!
//! Every run is written to `<dir>/run_<timestamp>_<run_id>.json` before the
//! relay is attempted, so a relay failure never loses a transcript.

use crate::types::RunOutcome;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, outcome: &RunOutcome) -> PathBuf {
        let stamp: String = outcome
            .started_at
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        self.dir
            .join(format!("run_{}_{}.json", stamp, outcome.run_id.simple()))
    }

    pub async fn save(&self, outcome: &RunOutcome) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating transcript dir {}", self.dir.display()))?;

        let path = self.path_for(outcome);
        let json = serde_json::to_string_pretty(outcome).context("serializing transcript")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing transcript {}", path.display()))?;

        info!(
            "💾 Transcript saved: {} ({} turns)",
            path.display(),
            outcome.records.len()
        );
        Ok(path)
    }

    pub async fn load(path: &Path) -> Result<RunOutcome> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading transcript {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing transcript {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompletionVerdict, TurnReason, TurnRecord};

    fn outcome() -> RunOutcome {
        RunOutcome {
            run_id: uuid::Uuid::new_v4(),
            started_at: "2026-03-01T10:20:30.123Z".to_string(),
            finished_at: "2026-03-01T10:21:00.000Z".to_string(),
            records: vec![
                TurnRecord::from_verdict(0, "hello", CompletionVerdict::stabilized("hi there, friend".into())),
                TurnRecord::degraded(1, "again", TurnReason::Cancelled),
            ],
            cancelled: true,
        }
    }

    #[tokio::test]
    async fn saved_transcript_loads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(tmp.path().join("runs"));
        let out = outcome();

        let path = store.save(&out).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("run_20260301T102030123Z_"));
        assert!(name.ends_with(".json"));

        let back = TranscriptStore::load(&path).await.unwrap();
        assert_eq!(back.run_id, out.run_id);
        assert_eq!(back.records, out.records);
        assert!(back.cancelled);
    }
}
