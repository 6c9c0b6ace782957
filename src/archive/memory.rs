//! In-memory archive usable in both access shapes.
//!
//! `MemArchive` is a seekable member table; `into_stream` replays the same
//! members in insertion order as an `EntryStream`. Duplicate paths are kept
//! in order; seekable lookup resolves to the first.

use std::io::{self, Read};
use std::sync::Arc;

use ahash::AHashMap;

use crate::archive::{EntryInfo, EntryStream, SeekableArchive};

#[derive(Clone, Debug, Default)]
pub struct MemArchive {
    entries: Vec<EntryInfo>,
    data: Vec<Arc<[u8]>>,
    index: AHashMap<String, usize>,
}

impl MemArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.push_file(path, bytes);
        self
    }

    pub fn with_dir(mut self, path: impl Into<String>) -> Self {
        self.push_dir(path);
        self
    }

    pub fn push_file(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let bytes: Arc<[u8]> = bytes.into().into();
        let info = EntryInfo::file(path, Some(bytes.len() as u64));
        self.push(info, bytes);
    }

    pub fn push_dir(&mut self, path: impl Into<String>) {
        self.push(EntryInfo::dir(path), Arc::from(&[][..]));
    }

    fn push(&mut self, info: EntryInfo, bytes: Arc<[u8]>) {
        let idx = self.entries.len();
        self.index.entry(info.path.clone()).or_insert(idx);
        self.entries.push(info);
        self.data.push(bytes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replay members in insertion order.
    pub fn into_stream(self) -> MemEntryStream {
        MemEntryStream {
            archive: self,
            next: 0,
            current: None,
        }
    }
}

impl SeekableArchive for MemArchive {
    fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    fn entry(&self, path: &str) -> Option<&EntryInfo> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    fn open(&mut self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        let Some(&idx) = self.index.get(path) else {
            return Ok(None);
        };
        Ok(Some(Box::new(io::Cursor::new(Arc::clone(&self.data[idx])))))
    }
}

/// Streaming view over a `MemArchive`.
pub struct MemEntryStream {
    archive: MemArchive,
    next: usize,
    current: Option<io::Cursor<Arc<[u8]>>>,
}

impl EntryStream for MemEntryStream {
    fn next_entry(&mut self) -> io::Result<Option<EntryInfo>> {
        let Some(info) = self.archive.entries.get(self.next) else {
            self.current = None;
            return Ok(None);
        };
        self.current = Some(io::Cursor::new(Arc::clone(&self.archive.data[self.next])));
        self.next += 1;
        Ok(Some(info.clone()))
    }

    fn read_content(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some(cur) => cur.read(dst),
            None => Ok(0),
        }
    }
}
