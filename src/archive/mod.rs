//! Archive byte-source collaborators.
//!
//! # Scope
//! Two access shapes feed the metadata readers:
//! - [`SeekableArchive`]: named-entry lookup plus independent content
//!   streams (zip central directory, in-memory tables).
//! - [`EntryStream`]: strictly ordered "next entry, then its bytes"
//!   (tar, network streams).
//!
//! Both deliver raw, already-decompressed entry bytes.
//!
//! # Design Notes
//! - `EntryStream` follows a cursor model: content not read before the next
//!   `next_entry` call is skipped.
//! - Entry paths are stored verbatim; case-insensitive matching is confined to
//!   the reserved names in [`names`].

use std::io::{self, Read};

pub mod config;
pub mod formats;
pub mod memory;
pub mod names;

pub use config::{ReaderConfig, MIN_MAX_LINE_LEN};
pub use formats::{is_ustar_header, is_zip_magic, TarEntryStream, ZipArchive};
pub use memory::{MemArchive, MemEntryStream};
pub use names::{
    is_manifest_path, is_meta_dir_marker, is_meta_path, signing_file, SigningFile, MANIFEST_PATH,
    META_DIR,
};

/// Metadata for one archive member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub path: String,
    /// Uncompressed size when the container records it.
    pub size: Option<u64>,
    pub is_dir: bool,
}

impl EntryInfo {
    pub fn file(path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            size,
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: Some(0),
            is_dir: true,
        }
    }
}

/// Archive that can open any named entry at any time.
pub trait SeekableArchive {
    /// Every member, in container order.
    fn entries(&self) -> &[EntryInfo];

    /// Exact, case-sensitive lookup.
    fn entry(&self, path: &str) -> Option<&EntryInfo> {
        self.entries().iter().find(|e| e.path == path)
    }

    /// Open a content stream; `None` if no such member exists.
    fn open(&mut self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>>;
}

/// Archive delivered as an ordered stream of entries.
pub trait EntryStream {
    /// Advance to the next member, discarding any unread content of the
    /// current one. `None` at end of archive.
    fn next_entry(&mut self) -> io::Result<Option<EntryInfo>>;

    /// Read content of the current member; `Ok(0)` at its end.
    fn read_content(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

impl<S: EntryStream + ?Sized> EntryStream for &mut S {
    fn next_entry(&mut self) -> io::Result<Option<EntryInfo>> {
        (**self).next_entry()
    }

    fn read_content(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        (**self).read_content(dst)
    }
}

/// `Read` adapter over the current member of an `EntryStream`.
pub struct ContentReader<'a, S: ?Sized> {
    stream: &'a mut S,
}

impl<'a, S: EntryStream + ?Sized> ContentReader<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        Self { stream }
    }
}

impl<S: EntryStream + ?Sized> Read for ContentReader<'_, S> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.stream.read_content(dst)
    }
}
