//! Journaled priority queue
//!
//! Same ordering as [`PriorityQueue`](crate::PriorityQueue), but every push is
//! appended to a JSON-lines journal before it becomes visible, and an entry
//! only leaves the heap once its pop record is on disk. Reopening the journal
//! replays the entries that were pushed and never popped.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::item::QueueItem;
use crate::priority::{PriorityState, QueueEntry};
use crate::queue::{JobQueue, QueueKind};
use crate::wait::pop_with;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Push {
        seq: u64,
        priority: i64,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        front: bool,
        item: QueueItem,
    },
    Pop {
        seq: u64,
    },
}

struct JournalState {
    queue: PriorityState,
    file: File,
    /// Length of the journal up to the last complete record
    committed: u64,
}

impl JournalState {
    /// Write one record as a single line. A failed write is cut back off the
    /// file so the journal never holds a half record.
    fn append(&mut self, record: &JournalRecord) -> QueueResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| QueueError::Journal(std::io::Error::other(e)))?;
        line.push('\n');
        if let Err(e) = self.file.write_all(line.as_bytes()).and_then(|_| self.file.flush()) {
            if let Err(cut) = self.file.set_len(self.committed) {
                warn!(error = %cut, "Could not cut failed append from journal");
            }
            return Err(e.into());
        }
        self.committed += line.len() as u64;
        Ok(())
    }

    fn append_push(&mut self, item: QueueItem, priority: i64, front: bool) -> QueueResult<()> {
        let seq = self.queue.next_sequence();
        self.append(&JournalRecord::Push {
            seq,
            priority,
            front,
            item: item.clone(),
        })?;
        self.queue.restore(QueueEntry {
            priority,
            sequence: seq,
            front,
            item,
        });
        Ok(())
    }
}

/// Priority queue backed by an append-only journal file
pub struct JournaledQueue {
    path: PathBuf,
    state: Mutex<JournalState>,
    notify: Notify,
}

impl JournaledQueue {
    /// Open (or create) the journal at `path`, replaying un-popped entries
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref().to_path_buf();
        let queue = if path.exists() {
            let (queue, torn_at) = replay(&path)?;
            if let Some(valid_len) = torn_at {
                OpenOptions::new().write(true).open(&path)?.set_len(valid_len)?;
            }
            queue
        } else {
            PriorityState::default()
        };

        if queue.len() > 0 {
            info!(
                path = %path.display(),
                entries = queue.len(),
                "Replayed journaled queue"
            );
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        // appends must start on a fresh line
        if ends_mid_line(&path)? {
            file.write_all(b"\n")?;
        }
        let committed = file.metadata()?.len();

        Ok(Self {
            path,
            state: Mutex::new(JournalState {
                queue,
                file,
                committed,
            }),
            notify: Notify::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the journal so it holds only live entries
    pub fn compact(&self) -> QueueResult<()> {
        let mut state = self.state.lock();
        let live = state.queue.ordered();

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for entry in &live {
                let record = JournalRecord::Push {
                    seq: entry.sequence,
                    priority: entry.priority,
                    front: entry.front,
                    item: entry.item.clone(),
                };
                let line = serde_json::to_string(&record)
                    .map_err(|e| QueueError::Journal(std::io::Error::other(e)))?;
                tmp.write_all(line.as_bytes())?;
                tmp.write_all(b"\n")?;
            }
            tmp.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        state.committed = file.metadata()?.len();
        state.file = file;
        debug!(path = %self.path.display(), live = live.len(), "Compacted journal");
        Ok(())
    }
}

/// Rebuild the live entries. Also returns the byte length to cut the file
/// back to when its final record is torn.
fn replay(path: &Path) -> QueueResult<(PriorityState, Option<u64>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut live: BTreeMap<u64, QueueEntry> = BTreeMap::new();
    let mut line = String::new();
    let mut offset = 0u64;
    let mut line_no = 0usize;
    let mut torn_at = None;

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let record = line.trim();
        if !record.is_empty() {
            match serde_json::from_str::<JournalRecord>(record) {
                Ok(JournalRecord::Push {
                    seq,
                    priority,
                    front,
                    item,
                }) => {
                    live.insert(
                        seq,
                        QueueEntry {
                            priority,
                            sequence: seq,
                            front,
                            item,
                        },
                    );
                }
                Ok(JournalRecord::Pop { seq }) => {
                    live.remove(&seq);
                }
                // a torn final line is what a crash mid-append leaves behind
                Err(e) if reader.fill_buf()?.is_empty() => {
                    warn!(line = line_no, error = %e, "Dropping truncated journal tail");
                    torn_at = Some(offset);
                    break;
                }
                Err(e) => {
                    return Err(QueueError::CorruptJournal {
                        line: line_no,
                        reason: e.to_string(),
                    });
                }
            }
        }
        offset += read as u64;
    }

    let mut state = PriorityState::default();
    for entry in live.into_values() {
        state.restore(entry);
    }
    Ok((state, torn_at))
}

fn ends_mid_line(path: &Path) -> QueueResult<bool> {
    let len = fs::metadata(path)?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl JobQueue for JournaledQueue {
    async fn push_with_priority(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        self.state.lock().append_push(item, priority, false)?;
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Option<Duration>) -> QueueResult<QueueItem> {
        Ok(self.pop_entry(timeout).await?.0)
    }

    async fn pop_entry(&self, timeout: Option<Duration>) -> QueueResult<(QueueItem, i64)> {
        pop_with(&self.notify, timeout, || {
            let mut state = self.state.lock();
            let Some(seq) = state.queue.peek_entry().map(|entry| entry.sequence) else {
                return Ok(None);
            };
            state.append(&JournalRecord::Pop { seq })?;
            Ok(state.queue.pop().map(|entry| (entry.item, entry.priority)))
        })
        .await
    }

    async fn requeue(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        self.state.lock().append_push(item, priority, true)?;
        self.notify.notify_one();
        Ok(())
    }

    async fn purge_sentinels(&self, marker: &str) -> QueueResult<usize> {
        let mut state = self.state.lock();
        let mut removed = state
            .queue
            .extract(|item| item.is_sentinel_for(marker))
            .into_iter();
        let mut purged = 0;
        while let Some(entry) = removed.next() {
            if let Err(e) = state.append(&JournalRecord::Pop {
                seq: entry.sequence,
            }) {
                state.queue.restore(entry);
                for rest in removed {
                    state.queue.restore(rest);
                }
                return Err(e);
            }
            purged += 1;
        }
        Ok(purged)
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.state.lock().queue.len())
    }

    async fn peek(&self, index: usize) -> QueueResult<Option<QueueItem>> {
        Ok(self.state.lock().queue.peek(index))
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Journaled
    }
}
