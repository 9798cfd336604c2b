//! JSONL event feed reader with a resumable byte cursor
//!
//! The upstream ingestion layer appends one JSON event envelope per line, in
//! chain order. This reader walks the file from a saved byte offset so a
//! restarted indexer resumes exactly where it stopped. Malformed lines are
//! logged and skipped; the feed contract says they should never occur, but a
//! torn final line after a crash is normal.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use crate::events::EventEnvelope;

pub struct EventFeedReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    poll_interval: Duration,
}

impl EventFeedReader {
    /// Open the feed and seek to `offset` (0 replays from the beginning).
    pub fn open(path: PathBuf, offset: u64) -> std::io::Result<Self> {
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;
        log::info!("📖 Reading event feed: {} from offset {}", path.display(), offset);
        Ok(Self {
            path,
            reader,
            offset,
            poll_interval: Duration::from_millis(200),
        })
    }

    /// Byte offset of the first unread line. Persist this to resume later.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next parseable event, or `None` at end of file.
    pub fn next_event(&mut self) -> std::io::Result<Option<EventEnvelope>> {
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                return Ok(None);
            }
            // A line without a trailing newline may still be mid-append;
            // leave the cursor before it so the next pass retries.
            if !line.ends_with('\n') {
                self.reader.seek(SeekFrom::Start(self.offset))?;
                return Ok(None);
            }
            self.offset += read as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<EventEnvelope>(trimmed) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    log::warn!("skipping malformed feed line at {}: {}", self.path.display(), e);
                    continue;
                }
            }
        }
    }

    /// Block until an event arrives, polling the file for appended data.
    pub fn wait_for_event(&mut self) -> std::io::Result<EventEnvelope> {
        loop {
            if let Some(envelope) = self.next_event()? {
                return Ok(envelope);
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
