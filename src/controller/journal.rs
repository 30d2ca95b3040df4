//! Durable per-pair event log and snapshot storage.
//!
//! Local, recoverable, single-writer, per pair — no database, no consensus.
//! Each pair gets one append-only JSONL event log and one snapshot
//! directory; both live under the directories named in [`AppConfig`].

use crate::book::OrderBook;
use crate::domain::{AssetPair, BookEvent};
use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

fn pair_file_stem(pair: &AssetPair) -> String {
    format!("{}-{}", pair.amount_asset, pair.price_asset)
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    seq: u64,
    event: BookEvent,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    seq: u64,
    book: OrderBook,
}

/// The append-only event log for one pair. Every write is a single JSON line;
/// a write failure here is fatal to the controller.
pub struct Journal {
    path: PathBuf,
    file: fs::File,
    next_seq: u64,
}

impl Journal {
    pub async fn open(journal_dir: &Path, pair: &AssetPair, next_seq: u64) -> anyhow::Result<Self> {
        fs::create_dir_all(journal_dir).await?;
        let path = journal_dir.join(format!("{}.jsonl", pair_file_stem(pair)));
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Journal {
            path,
            file,
            next_seq,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `event` as the next sequence number and flushes it to disk
    /// before returning. Returns the sequence number assigned.
    pub async fn append(&mut self, event: &BookEvent) -> Result<u64, ControllerError> {
        let seq = self.next_seq;
        let entry = JournalEntry {
            seq,
            event: event.clone(),
        };
        let mut line =
            serde_json::to_vec(&entry).map_err(|e| ControllerError::EventLogWrite(e.to_string()))?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .map_err(|e| ControllerError::EventLogWrite(e.to_string()))?;
        self.file
            .flush()
            .await
            .map_err(|e| ControllerError::EventLogWrite(e.to_string()))?;
        self.next_seq = seq + 1;
        Ok(seq)
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

/// Reads every entry in the journal file with `seq > after_seq`, in order.
pub async fn replay_journal(
    journal_dir: &Path,
    pair: &AssetPair,
    after_seq: u64,
) -> anyhow::Result<(Vec<(u64, BookEvent)>, u64)> {
    let path = journal_dir.join(format!("{}.jsonl", pair_file_stem(pair)));
    let mut next_seq = after_seq + 1;
    let contents = match fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), next_seq)),
        Err(e) => return Err(e.into()),
    };

    let mut events = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = serde_json::from_str(line)?;
        if entry.seq > after_seq {
            events.push((entry.seq, entry.event));
            next_seq = entry.seq + 1;
        }
    }
    Ok((events, next_seq))
}

/// Saves a snapshot atomically: write to a temp file in the same directory,
/// then rename over the canonical path, so a crash mid-write never leaves a
/// corrupt "latest" snapshot.
pub async fn save_snapshot(
    snapshots_dir: &Path,
    pair: &AssetPair,
    seq: u64,
    book: &OrderBook,
) -> Result<(), ControllerError> {
    let dir_err = |e: std::io::Error| ControllerError::SnapshotWrite(e.to_string());
    fs::create_dir_all(snapshots_dir).await.map_err(dir_err)?;

    let stem = pair_file_stem(pair);
    let final_path = snapshots_dir.join(format!("{stem}.snapshot.json"));
    let tmp_path = snapshots_dir.join(format!("{stem}.snapshot.json.tmp"));

    let snapshot = Snapshot { seq, book: book.clone() };
    let bytes = serde_json::to_vec(&snapshot).map_err(|e| ControllerError::SnapshotWrite(e.to_string()))?;

    fs::write(&tmp_path, &bytes).await.map_err(dir_err)?;
    fs::rename(&tmp_path, &final_path).await.map_err(dir_err)?;
    Ok(())
}

/// Loads the latest snapshot for `pair`, if one exists.
pub async fn load_snapshot(
    snapshots_dir: &Path,
    pair: &AssetPair,
) -> anyhow::Result<Option<(u64, OrderBook)>> {
    let path = snapshots_dir.join(format!("{}.snapshot.json", pair_file_stem(pair)));
    let bytes = match fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    let mut book = snapshot.book;
    book.rebuild_index();
    Ok(Some((snapshot.seq, book)))
}

/// Deletes the journal and snapshot for a pair.
pub async fn delete_pair_storage(
    journal_dir: &Path,
    snapshots_dir: &Path,
    pair: &AssetPair,
) -> anyhow::Result<()> {
    let stem = pair_file_stem(pair);
    let journal_path = journal_dir.join(format!("{stem}.jsonl"));
    let snapshot_path = snapshots_dir.join(format!("{stem}.snapshot.json"));
    for path in [journal_path, snapshot_path] {
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Full recovery for one pair: latest snapshot (if any) plus journal replay
/// from that point. Returns the recovered book and the next sequence number
/// a freshly-opened journal should continue from.
pub async fn recover(
    journal_dir: &Path,
    snapshots_dir: &Path,
    pair: &AssetPair,
) -> anyhow::Result<(OrderBook, u64)> {
    let (mut book, snapshot_seq) = match load_snapshot(snapshots_dir, pair).await? {
        Some((seq, book)) => (book, seq),
        None => (OrderBook::new(), 0),
    };
    let (events, next_seq) = replay_journal(journal_dir, pair, snapshot_seq).await?;
    for (_, event) in events {
        book.update_state(event);
    }
    Ok((book, next_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetId;
    use crate::domain::order::Order;
    use crate::domain::{LimitOrder, Side};
    use crate::signing::test_support::TestKeypair;
    use chrono::{DateTime, Duration, Utc};
    use tempfile::tempdir;

    fn pair() -> AssetPair {
        AssetPair::new(AssetId::Issued([3u8; 32]), AssetId::Native)
    }

    fn sample_order(kp: &TestKeypair, amount: u64) -> LimitOrder {
        let p = pair();
        let timestamp = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(10);
        let expiration = timestamp + Duration::seconds(3600);
        let bytes = Order::signed_bytes(&kp.public, &p, Side::Buy, 10, amount, timestamp, expiration, 1);
        let signature = kp.sign(&bytes);
        let order = Order::new(kp.public, p, Side::Buy, 10, amount, timestamp, expiration, 1, signature);
        LimitOrder::new(order)
    }

    #[tokio::test]
    async fn journal_round_trips_through_replay() {
        let dir = tempdir().unwrap();
        let pair = pair();
        let kp = TestKeypair::generate(1);
        let lo = sample_order(&kp, 100);

        let mut journal = Journal::open(dir.path(), &pair, 0).await.unwrap();
        journal.append(&BookEvent::OrderAdded(lo.clone())).await.unwrap();

        let (events, next_seq) = replay_journal(dir.path(), &pair, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(next_seq, 1);
        assert!(matches!(&events[0].1, BookEvent::OrderAdded(o) if o.id() == lo.id()));
    }

    #[tokio::test]
    async fn snapshot_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let pair = pair();
        let kp = TestKeypair::generate(2);
        let lo = sample_order(&kp, 50);
        let mut book = OrderBook::new();
        book.add(lo.clone());

        save_snapshot(dir.path(), &pair, 7, &book).await.unwrap();
        let (seq, loaded) = load_snapshot(dir.path(), &pair).await.unwrap().unwrap();
        assert_eq!(seq, 7);
        assert!(loaded.contains(lo.id()));
    }

    #[tokio::test]
    async fn recover_combines_snapshot_and_later_events() {
        let snap_dir = tempdir().unwrap();
        let journal_dir = tempdir().unwrap();
        let pair = pair();
        let kp = TestKeypair::generate(3);

        let resting = sample_order(&kp, 50);
        let mut book = OrderBook::new();
        book.add(resting.clone());
        save_snapshot(snap_dir.path(), &pair, 3, &book).await.unwrap();

        let cancel_event = BookEvent::OrderCanceled(resting.clone());
        let mut journal = Journal::open(journal_dir.path(), &pair, 4).await.unwrap();
        journal.append(&cancel_event).await.unwrap();

        let (recovered, next_seq) = recover(journal_dir.path(), snap_dir.path(), &pair).await.unwrap();
        assert!(!recovered.contains(resting.id()));
        assert_eq!(next_seq, 5);
    }
}
