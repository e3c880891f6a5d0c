//! Exporting a snapshot set as a single tar stream.
//!
//! The stream is a GNU tar holding `export.json` followed by every archive
//! of the set, byte for byte. Its exact length is known before anything is
//! written, so it can be announced up front (e.g. as a content length).

use crate::backend::Backend;
use crate::error::{Result, SnapshotError};
use crate::stream::ExactReader;
use appsnap_common::{CancelToken, SetId};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use tracing::info;

/// Name of the export description inside the stream.
pub const EXPORT_METADATA_NAME: &str = "export.json";

/// Version of the export stream layout.
pub const EXPORT_FORMAT: u32 = 1;

const BLOCK_SIZE: u64 = 512;
const TRAILER_SIZE: u64 = 2 * BLOCK_SIZE;
/// Longest name a plain header can hold.
const NAME_FIELD_LEN: usize = 100;

/// Contents of `export.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub format: u32,
    pub date: DateTime<Utc>,
    pub files: Vec<String>,
}

struct ExportFile {
    name: String,
    file: File,
    len: u64,
    mtime: u64,
}

/// A snapshot set prepared for streaming.
pub struct SnapshotExport {
    set_id: SetId,
    date: DateTime<Utc>,
    metadata: Vec<u8>,
    files: Vec<ExportFile>,
    size: Option<u64>,
}

impl std::fmt::Debug for SnapshotExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotExport")
            .field("set_id", &self.set_id)
            .field("files", &self.files.iter().map(|file| &file.name).collect::<Vec<_>>())
            .field("size", &self.size)
            .finish()
    }
}

impl SnapshotExport {
    /// Take handles on every archive of `set_id`.
    ///
    /// The handles stay valid even if the archives are removed afterwards.
    pub fn new(backend: &Backend, ctx: &CancelToken, set_id: SetId) -> Result<Self> {
        let mut files = Vec::new();
        backend.iter(ctx, |reader| {
            if reader.snapshot().set_id != set_id {
                return Ok(());
            }
            let name = reader
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(ExportFile {
                name,
                file: reader.duplicate_file()?,
                len: 0,
                mtime: 0,
            });
            Ok(())
        })?;

        if files.is_empty() {
            return Err(SnapshotError::NoSnapshotData(set_id));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let now = backend.now();
        let date = now.with_nanosecond(0).unwrap_or(now);
        let metadata = serde_json::to_vec(&ExportMetadata {
            format: EXPORT_FORMAT,
            date,
            files: files.iter().map(|f| f.name.clone()).collect(),
        })?;

        Ok(Self {
            set_id,
            date,
            metadata,
            files,
            size: None,
        })
    }

    pub fn set_id(&self) -> SetId {
        self.set_id
    }

    /// Archive filenames in stream order.
    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Measure every archive and compute the stream length.
    pub fn init(&mut self) -> Result<()> {
        let mut size = entry_size(EXPORT_METADATA_NAME, self.metadata.len() as u64);
        for f in &mut self.files {
            let meta = f.file.metadata()?;
            if !meta.is_file() {
                return Err(SnapshotError::UnexpectedFileType(f.name.clone()));
            }
            f.len = meta.len();
            f.mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or_default();
            size += entry_size(&f.name, f.len);
        }
        size += TRAILER_SIZE;
        self.size = Some(size);
        Ok(())
    }

    /// Stream length in bytes, once [`init`](Self::init) has run.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Write the whole stream; initialises first if needed.
    ///
    /// Fails if the archives changed size since [`init`](Self::init).
    pub fn stream_to<W: Write>(&mut self, w: W) -> Result<u64> {
        if self.size.is_none() {
            self.init()?;
        }
        let expected = self.size.unwrap_or_default();

        let mut builder = tar::Builder::new(CountingWriter::new(w));

        let mut header = regular_header(self.metadata.len() as u64, 0o640, self.date_secs());
        builder.append_data(&mut header, EXPORT_METADATA_NAME, self.metadata.as_slice())?;

        for f in &self.files {
            let mut header = regular_header(f.len, 0o600, f.mtime);
            let mut file = &f.file;
            file.seek(SeekFrom::Start(0))?;
            builder.append_data(&mut header, &f.name, ExactReader::new(file, f.len))?;
        }

        let counter = builder.into_inner()?;
        let written = counter.count;
        if written != expected {
            return Err(SnapshotError::ExportSizeMismatch {
                expected,
                actual: written,
            });
        }

        info!(set_id = %self.set_id, files = self.files.len(), bytes = written, "Snapshot set exported");
        Ok(written)
    }

    fn date_secs(&self) -> u64 {
        u64::try_from(self.date.timestamp()).unwrap_or_default()
    }
}

fn regular_header(len: u64, mode: u32, mtime: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(len);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header
}

fn padded(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Bytes one entry occupies in a GNU tar stream.
fn entry_size(name: &str, len: u64) -> u64 {
    let long_name = if name.len() > NAME_FIELD_LEN {
        // GNU long-name header plus the NUL-terminated name.
        BLOCK_SIZE + padded(name.len() as u64 + 1)
    } else {
        0
    };
    long_name + BLOCK_SIZE + padded(len)
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_len(entries: &[(&str, usize)]) -> u64 {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, len) in entries {
            let data = vec![0u8; *len];
            let mut header = regular_header(*len as u64, 0o600, 0);
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().len() as u64
    }

    fn modelled_len(entries: &[(&str, usize)]) -> u64 {
        entries
            .iter()
            .map(|(name, len)| entry_size(name, *len as u64))
            .sum::<u64>()
            + TRAILER_SIZE
    }

    #[test]
    fn test_padded() {
        assert_eq!(padded(0), 0);
        assert_eq!(padded(1), 512);
        assert_eq!(padded(512), 512);
        assert_eq!(padded(513), 1024);
    }

    #[test]
    fn test_entry_size_model_matches_tar() {
        let long = "1_".to_string() + &"x".repeat(150) + ".zip";
        let exactly_100 = "9_".to_string() + &"y".repeat(94) + ".zip";
        let cases: Vec<Vec<(&str, usize)>> = vec![
            vec![],
            vec![("export.json", 0)],
            vec![("export.json", 87), ("1_a.zip", 512)],
            vec![("1_a.zip", 513), ("2_b.zip", 1)],
            vec![(long.as_str(), 1000)],
            vec![(exactly_100.as_str(), 10)],
        ];
        for entries in cases {
            assert_eq!(modelled_len(&entries), stream_len(&entries), "{:?}", entries);
        }
    }

    #[test]
    fn test_counting_writer() {
        let mut w = CountingWriter::new(Vec::new());
        w.write_all(b"hello").unwrap();
        w.write_all(b" world").unwrap();
        assert_eq!(w.count, 11);
        assert_eq!(w.inner, b"hello world");
    }

    #[test]
    fn test_metadata_json_shape() {
        let meta = ExportMetadata {
            format: EXPORT_FORMAT,
            date: DateTime::from_timestamp(0, 0).unwrap(),
            files: vec!["1_a.zip".to_string()],
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["format"], 1);
        assert_eq!(value["date"], "1970-01-01T00:00:00Z");
        assert_eq!(value["files"][0], "1_a.zip");
    }
}
