//! The dispatcher's persistent "known pairs" set.
//!
//! Backed by an append-only log of `OrderBookCreated` entries, one JSON line
//! per pair, replayed at startup the same way [`crate::controller::journal`]
//! replays a book's event log. A pair, once known, is never forgotten here —
//! deleting a pair's book (`MatcherDispatcher::delete_pair`) stops its
//! controller but leaves the orientation decision in place, so the reverse
//! pair can never later be accepted as canonical (see `DESIGN.md`).

use crate::domain::AssetPair;
use dashmap::DashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct PairRegistry {
    known: DashSet<AssetPair>,
    log_path: PathBuf,
}

impl PairRegistry {
    /// Loads the registry from `<journal_dir>/pairs.jsonl`, replaying every
    /// recorded pair. An absent file means a fresh install, not an error.
    pub async fn load(journal_dir: &Path) -> anyhow::Result<Self> {
        let log_path = journal_dir.join("pairs.jsonl");
        let known = DashSet::new();
        match fs::read_to_string(&log_path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let pair: AssetPair = serde_json::from_str(line)?;
                    known.insert(pair);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(PairRegistry { known, log_path })
    }

    pub fn contains(&self, pair: &AssetPair) -> bool {
        self.known.contains(pair)
    }

    pub fn known_pairs(&self) -> Vec<AssetPair> {
        self.known.iter().map(|p| *p).collect()
    }

    /// Records a newly accepted pair: appended to the log, then added to the
    /// in-memory set. Called under the dispatcher's creation lock, so two
    /// concurrent first-submissions for the same pair never race each other
    /// here.
    pub async fn record(&self, pair: AssetPair) -> anyhow::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(&pair)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        self.known.insert(pair);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetId;
    use tempfile::tempdir;

    fn pair() -> AssetPair {
        AssetPair::new(AssetId::Issued([4u8; 32]), AssetId::Native)
    }

    #[tokio::test]
    async fn fresh_registry_knows_nothing() {
        let dir = tempdir().unwrap();
        let registry = PairRegistry::load(dir.path()).await.unwrap();
        assert!(!registry.contains(&pair()));
        assert!(registry.known_pairs().is_empty());
    }

    #[tokio::test]
    async fn recorded_pair_survives_reload() {
        let dir = tempdir().unwrap();
        let registry = PairRegistry::load(dir.path()).await.unwrap();
        registry.record(pair()).await.unwrap();
        assert!(registry.contains(&pair()));

        let reloaded = PairRegistry::load(dir.path()).await.unwrap();
        assert!(reloaded.contains(&pair()));
        assert_eq!(reloaded.known_pairs(), vec![pair()]);
    }
}
