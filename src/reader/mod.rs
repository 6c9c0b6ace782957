//! Archive readers that resolve manifest metadata and drive verification.
//!
//! # Scope
//! - [`ArchiveFile`]: random-access archives. The manifest is located and
//!   decoded on first use and cached for the life of the open; the metadata
//!   pass runs lazily before the first entry is opened.
//! - [`ArchiveStream`]: sequential archives. The manifest is recognized only
//!   as the first entry (after an optional `META-INF/` marker), and leading
//!   metadata entries are fed to the verifier before any payload entry is
//!   returned.
//!
//! Both implement [`MetadataResolver`] and share one
//! [`VerificationProtocol`](crate::verify::VerificationProtocol) driver.
//!
//! # Invariants
//! - A missing manifest is `Ok(None)`, never an error.
//! - Manifest and metadata entries are read with hard size caps from
//!   [`ReaderConfig`].
//! - Entry readers surface integrity failures as `io::Error`s carrying an
//!   [`IntegrityError`](crate::errors::IntegrityError); convert with
//!   `ArchiveError::from` to recover it.

use std::io::{self, Read};
use std::sync::Arc;

use crate::archive::{EntryInfo, ReaderConfig};
use crate::errors::ArchiveError;
use crate::manifest::{Attributes, Manifest, ManifestDecoder};
use crate::verify::{EntryState, Verifier, VerifyingReader};

pub mod random_access;
pub mod sequential;

pub use random_access::ArchiveFile;
pub use sequential::{ArchiveStream, StreamContent};

/// Manifest lookup shared by both reader modes.
pub trait MetadataResolver {
    /// The archive's manifest, or `None` if it has none.
    fn resolve(&mut self) -> Result<Option<Arc<Manifest>>, ArchiveError>;

    /// Per-entry attributes for `path`.
    fn attributes_for(&mut self, path: &str) -> Result<Option<Attributes>, ArchiveError> {
        Ok(self
            .resolve()?
            .and_then(|manifest| manifest.entry(path).cloned()))
    }
}

/// One open archive entry.
///
/// Reads go through the verifier while the session is active; the entry's
/// outcome is final once a read returns `Ok(0)` or an error.
pub struct EntryReader<'a, R, V> {
    info: EntryInfo,
    attributes: Option<Attributes>,
    inner: VerifyingReader<'a, R, V>,
}

impl<'a, R, V> EntryReader<'a, R, V> {
    pub(crate) fn new(
        info: EntryInfo,
        attributes: Option<Attributes>,
        inner: VerifyingReader<'a, R, V>,
    ) -> Self {
        Self {
            info,
            attributes,
            inner,
        }
    }

    pub fn info(&self) -> &EntryInfo {
        &self.info
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Manifest attributes recorded for this entry.
    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }

    /// Verification state; `None` when the entry is not being verified.
    pub fn state(&self) -> Option<EntryState> {
        self.inner.state()
    }

    pub fn is_verifying(&self) -> bool {
        self.inner.is_verifying()
    }
}

impl<R: Read, V: Verifier> Read for EntryReader<'_, R, V> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.inner.read(dst)
    }
}

pub(crate) fn manifest_decoder(config: &ReaderConfig) -> ManifestDecoder {
    ManifestDecoder::new()
        .with_max_line_len(config.max_line_len)
        .with_scan_buffer_len(config.scan_buffer_len)
}

pub(crate) fn decode_manifest(raw: &[u8], config: &ReaderConfig) -> Result<Manifest, ArchiveError> {
    Ok(manifest_decoder(config).decode_slice(raw)?)
}

/// Read `reader` to the end, failing once more than `limit` bytes arrive.
pub(crate) fn read_capped<R: Read>(
    reader: R,
    limit: u64,
    too_large: impl FnOnce() -> ArchiveError,
) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(too_large());
    }
    Ok(buf)
}
