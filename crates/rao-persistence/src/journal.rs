//! ---
//! rao_section: "03-persistence-logging"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Persistence abstractions and storage bindings."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PersistenceError, Result};

const JOURNAL_FORMAT: u16 = 1;

/// First line of every journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    format: u16,
    stream: String,
    created_at: DateTime<Utc>,
}

/// One appended record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequence number assigned on append, starting at 1.
    pub sequence: u64,
    /// Wall-clock time of the append.
    pub recorded_at: DateTime<Utc>,
    /// Record discriminator, e.g. `transition` or `cnec_result`.
    pub kind: String,
    /// Record body.
    pub payload: serde_json::Value,
}

impl JournalEntry {
    /// Construct an unsequenced entry.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            sequence: 0,
            recorded_at: Utc::now(),
            kind: kind.into(),
            payload,
        }
    }
}

/// Append-only writer bound to one named stream.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl JournalWriter {
    /// Open (or create) a journal for `stream`. An existing file must carry
    /// the same stream name in its header.
    pub fn open(path: &Path, stream: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let next_sequence = if fresh {
            0
        } else {
            let header = read_header(path)?;
            if header.stream != stream {
                return Err(PersistenceError::StreamMismatch {
                    path: path.display().to_string(),
                    expected: stream.to_owned(),
                    found: header.stream,
                });
            }
            last_sequence(path)?
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if fresh {
            let header = JournalHeader {
                format: JOURNAL_FORMAT,
                stream: stream.to_owned(),
                created_at: Utc::now(),
            };
            serde_json::to_writer(&mut writer, &header)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append an entry, flush, and return its sequence number.
    pub fn append(&mut self, mut entry: JournalEntry) -> Result<u64> {
        self.next_sequence += 1;
        entry.sequence = self.next_sequence;
        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(entry.sequence)
    }

    /// Location of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_header(path: &Path) -> Result<JournalHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    serde_json::from_str(first.trim())
        .map_err(|_| PersistenceError::MissingHeader(path.display().to_string()))
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0;
    // A torn trailing line from a crash must not block reopening.
    for entry in JournalReader::open(path)?.flatten() {
        last = entry.sequence;
    }
    Ok(last)
}

/// Sequential reader over the entries of a journal.
pub struct JournalReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl JournalReader {
    /// Open a journal and skip its header line.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(PersistenceError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

/// Replay every entry in order through `handler`, returning the count.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(JournalEntry) -> Result<()>,
{
    let mut count = 0;
    for entry in JournalReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Collect all entries of a journal.
pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
    JournalReader::open(path)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn append_and_replay_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.log");
        let mut writer = JournalWriter::open(&path, "case-status").unwrap();
        assert_eq!(
            writer
                .append(JournalEntry::new("transition", json!({"to": "PARSED"})))
                .unwrap(),
            1
        );
        writer
            .append(JournalEntry::new("transition", json!({"to": "BUILT"})))
            .unwrap();

        let mut seen = Vec::new();
        let count = replay(&path, |entry| {
            seen.push(entry.payload["to"].as_str().unwrap().to_owned());
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec!["PARSED", "BUILT"]);
    }

    #[test]
    fn reopening_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/status.log");
        {
            let mut writer = JournalWriter::open(&path, "case-status").unwrap();
            writer.append(JournalEntry::new("a", json!(1))).unwrap();
            writer.append(JournalEntry::new("b", json!(2))).unwrap();
        }
        let mut writer = JournalWriter::open(&path, "case-status").unwrap();
        assert_eq!(writer.append(JournalEntry::new("c", json!(3))).unwrap(), 3);
        let sequences: Vec<_> = read_entries(&path)
            .unwrap()
            .into_iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_foreign_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        JournalWriter::open(&path, "case-results").unwrap();
        assert!(matches!(
            JournalWriter::open(&path, "case-status"),
            Err(PersistenceError::StreamMismatch { .. })
        ));
    }
}
