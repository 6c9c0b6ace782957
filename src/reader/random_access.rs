//! Random-access metadata resolver.
//!
//! # Algorithm
//! 1. `manifest()` looks up `META-INF/MANIFEST.MF` exactly, then falls back
//!    to a case-insensitive match among all entries. The decoded manifest is
//!    cached; a session is created from the exact bytes read when
//!    verification is enabled.
//! 2. The first `open_entry` runs the metadata pass: every non-directory
//!    `META-INF/` entry is read whole and fed to the session, then
//!    `done_with_meta` decides between `Active` and pass-through.
//! 3. Each opened entry is wrapped by the protocol.
//!
//! # Invariants
//! - The manifest is read and decoded at most once per open. A decode
//!   failure is not cached; the next call retries.
//! - An integrity failure during the metadata pass is returned by every
//!   later `open_entry`.

use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use crate::archive::{
    is_manifest_path, is_meta_path, EntryInfo, ReaderConfig, SeekableArchive, MANIFEST_PATH,
};
use crate::errors::{ArchiveError, IntegrityError};
use crate::manifest::{Attributes, Manifest};
use crate::reader::{decode_manifest, read_capped, EntryReader, MetadataResolver};
use crate::verify::{
    DigestVerifierFactory, EntryDescriptor, EntryState, GlobalState, Signer, VerificationProtocol,
    VerifierFactory,
};

enum ManifestSlot {
    Unresolved,
    Resolved(Option<Arc<Manifest>>),
}

enum MetaPass {
    Pending,
    Done,
    Failed(IntegrityError),
}

/// Entry reader returned by [`ArchiveFile::open_entry`].
pub type FileEntry<'a, V> = EntryReader<'a, Box<dyn Read + 'a>, V>;

/// One open random-access archive.
pub struct ArchiveFile<A, F: VerifierFactory = DigestVerifierFactory> {
    archive: A,
    config: ReaderConfig,
    factory: F,
    manifest: ManifestSlot,
    protocol: VerificationProtocol<F::Verifier>,
    meta_pass: MetaPass,
}

impl<A: SeekableArchive> ArchiveFile<A> {
    /// Open with the built-in digest verifier.
    pub fn open(archive: A, config: ReaderConfig) -> Result<Self, ArchiveError> {
        Self::with_verifier(archive, config, DigestVerifierFactory::default())
    }
}

impl<A: SeekableArchive, F: VerifierFactory> ArchiveFile<A, F> {
    pub fn with_verifier(
        archive: A,
        config: ReaderConfig,
        factory: F,
    ) -> Result<Self, ArchiveError> {
        config.validate()?;
        Ok(Self {
            archive,
            config,
            factory,
            manifest: ManifestSlot::Unresolved,
            protocol: VerificationProtocol::unverified(),
            meta_pass: MetaPass::Pending,
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn entries(&self) -> &[EntryInfo] {
        self.archive.entries()
    }

    /// Decoded manifest, cached after the first successful call.
    pub fn manifest(&mut self) -> Result<Option<Arc<Manifest>>, ArchiveError> {
        if let ManifestSlot::Resolved(cached) = &self.manifest {
            return Ok(cached.clone());
        }

        let Some(path) = self.manifest_path() else {
            debug!("no manifest entry");
            self.manifest = ManifestSlot::Resolved(None);
            return Ok(None);
        };
        let limit = self.config.max_manifest_bytes;
        let raw = match self.archive.open(&path)? {
            Some(reader) => {
                read_capped(reader, limit, || ArchiveError::ManifestTooLarge { limit })?
            }
            None => {
                self.manifest = ManifestSlot::Resolved(None);
                return Ok(None);
            }
        };
        let manifest = Arc::new(decode_manifest(&raw, &self.config)?);
        debug!(
            path = %path,
            bytes = raw.len(),
            entries = manifest.entry_count(),
            "manifest decoded"
        );

        if self.config.verify {
            let raw: Arc<[u8]> = raw.into();
            self.protocol = VerificationProtocol::new(self.factory.session(raw, manifest.clone()));
        }
        self.manifest = ManifestSlot::Resolved(Some(manifest.clone()));
        Ok(Some(manifest))
    }

    /// Manifest attributes recorded for `path`.
    pub fn entry_attributes(&mut self, path: &str) -> Result<Option<Attributes>, ArchiveError> {
        self.attributes_for(path)
    }

    /// Open `path` for reading; `None` if the archive has no such entry.
    ///
    /// The first call runs the metadata pass.
    pub fn open_entry(
        &mut self,
        path: &str,
    ) -> Result<Option<FileEntry<'_, F::Verifier>>, ArchiveError> {
        self.ensure_meta_pass()?;
        let Some(info) = self.archive.entry(path).cloned() else {
            return Ok(None);
        };
        let attributes = match &self.manifest {
            ManifestSlot::Resolved(Some(manifest)) => manifest.entry(path).cloned(),
            _ => None,
        };

        let Some(inner) = self.archive.open(path)? else {
            return Ok(None);
        };
        let desc = EntryDescriptor {
            path,
            attributes: attributes.as_ref(),
            size: info.size,
        };
        let reader = self.protocol.wrap(&desc, inner)?;
        Ok(Some(EntryReader::new(info, attributes, reader)))
    }

    /// Read `path` to the end through the verifier.
    pub fn read_entry(&mut self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let Some(mut entry) = self.open_entry(path)? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(entry.info().size.unwrap_or(0).min(1 << 20) as usize);
        entry.read_to_end(&mut out)?;
        Ok(Some(out))
    }

    /// Signers of `path` once it has been read to the end and verified.
    pub fn signers(&self, path: &str) -> Option<&[Signer]> {
        self.protocol.signers(path)
    }

    pub fn verification_state(&self) -> GlobalState {
        self.protocol.state()
    }

    pub fn entry_state(&self, path: &str) -> EntryState {
        self.protocol.entry_state(path)
    }

    /// Release the underlying archive; drops the cached manifest and session.
    pub fn close(self) -> A {
        self.archive
    }

    fn manifest_path(&self) -> Option<String> {
        if self.archive.entry(MANIFEST_PATH).is_some_and(|e| !e.is_dir) {
            return Some(MANIFEST_PATH.to_string());
        }
        self.archive
            .entries()
            .iter()
            .find(|e| !e.is_dir && is_manifest_path(&e.path))
            .map(|e| e.path.clone())
    }

    fn ensure_meta_pass(&mut self) -> Result<(), ArchiveError> {
        match &self.meta_pass {
            MetaPass::Done => return Ok(()),
            MetaPass::Failed(err) => return Err(err.clone().into()),
            MetaPass::Pending => {}
        }

        let manifest = self.manifest()?;
        if self.protocol.state() != GlobalState::CollectingMeta {
            self.meta_pass = MetaPass::Done;
            return Ok(());
        }

        let meta: Vec<EntryInfo> = self
            .archive
            .entries()
            .iter()
            .filter(|e| !e.is_dir && is_meta_path(&e.path))
            .cloned()
            .collect();
        debug!(entries = meta.len(), "metadata pass");

        let limit = self.config.max_meta_entry_bytes;
        for info in &meta {
            let Some(reader) = self.archive.open(&info.path)? else {
                continue;
            };
            let bytes = read_capped(reader, limit, || ArchiveError::MetaEntryTooLarge {
                path: info.path.clone(),
                limit,
            })?;
            let desc = EntryDescriptor {
                path: &info.path,
                attributes: manifest.as_ref().and_then(|m| m.entry(&info.path)),
                size: Some(bytes.len() as u64),
            };
            if let Err(err) = self.protocol.feed_meta(&desc, &bytes) {
                self.meta_pass = MetaPass::Failed(err.clone());
                return Err(err.into());
            }
        }

        self.protocol.done_with_meta();
        self.meta_pass = MetaPass::Done;
        Ok(())
    }
}

impl<A: SeekableArchive, F: VerifierFactory> MetadataResolver for ArchiveFile<A, F> {
    fn resolve(&mut self) -> Result<Option<Arc<Manifest>>, ArchiveError> {
        self.manifest()
    }
}
