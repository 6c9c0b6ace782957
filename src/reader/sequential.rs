//! Sequential metadata bootstrap.
//!
//! # Algorithm
//! On open:
//! - read the first entry, skipping a bare `META-INF/` marker;
//! - if it is the manifest (any case), decode it, create a session when
//!   verification is enabled, and consume it; it is never returned to the
//!   caller;
//! - otherwise the stream has no manifest and the entry is held for the
//!   first `next_entry`.
//!
//! While the session collects metadata, the first `next_entry` buffers every
//! leading `META-INF/` entry, feeds the non-directory ones to the session,
//! and calls `done_with_meta` at the first payload entry or end of stream.
//! Buffered entries are then returned in stream order before the payload.
//!
//! # Invariants
//! - A manifest that is not the first entry is never parsed.
//! - No payload entry is returned before the metadata phase is closed.
//! - An integrity failure while collecting metadata is returned by every
//!   later `next_entry`.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::archive::{
    is_manifest_path, is_meta_dir_marker, is_meta_path, ContentReader, EntryInfo, EntryStream,
    ReaderConfig,
};
use crate::errors::{ArchiveError, IntegrityError};
use crate::manifest::Manifest;
use crate::reader::{decode_manifest, read_capped, EntryReader, MetadataResolver};
use crate::verify::{
    DigestVerifierFactory, EntryDescriptor, EntryState, GlobalState, Signer, VerificationProtocol,
    VerifierFactory,
};

/// Content of an entry returned by [`ArchiveStream::next_entry`].
pub enum StreamContent<'a, S> {
    /// Metadata entry buffered during the metadata phase.
    Buffered(io::Cursor<Vec<u8>>),
    /// Current member of the underlying stream.
    Live(ContentReader<'a, S>),
}

impl<S: EntryStream> Read for StreamContent<'_, S> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamContent::Buffered(cur) => cur.read(dst),
            StreamContent::Live(live) => live.read(dst),
        }
    }
}

/// Entry reader returned by [`ArchiveStream::next_entry`].
pub type StreamEntry<'a, S, V> = EntryReader<'a, StreamContent<'a, S>, V>;

struct Buffered {
    info: EntryInfo,
    bytes: Vec<u8>,
}

/// One open sequential archive.
pub struct ArchiveStream<S, F: VerifierFactory = DigestVerifierFactory> {
    stream: S,
    config: ReaderConfig,
    manifest: Option<Arc<Manifest>>,
    protocol: VerificationProtocol<F::Verifier>,
    /// Metadata entries read ahead during the metadata phase.
    pending: VecDeque<Buffered>,
    /// Entry already read from `stream` whose content is still unread.
    lookahead: Option<EntryInfo>,
    failure: Option<IntegrityError>,
}

impl<S: EntryStream> ArchiveStream<S> {
    /// Open with the built-in digest verifier.
    pub fn open(stream: S, config: ReaderConfig) -> Result<Self, ArchiveError> {
        Self::with_verifier(stream, config, DigestVerifierFactory::default())
    }
}

impl<S: EntryStream, F: VerifierFactory> ArchiveStream<S, F> {
    /// Open and bootstrap the manifest from the head of `stream`.
    pub fn with_verifier(
        mut stream: S,
        config: ReaderConfig,
        factory: F,
    ) -> Result<Self, ArchiveError> {
        config.validate()?;

        let mut first = stream.next_entry()?;
        if first.as_ref().is_some_and(|e| is_meta_dir_marker(&e.path)) {
            trace!("skipping metadata directory marker");
            first = stream.next_entry()?;
        }

        let mut manifest = None;
        let mut protocol = VerificationProtocol::unverified();
        let mut lookahead = None;
        match first {
            Some(info) if !info.is_dir && is_manifest_path(&info.path) => {
                let limit = config.max_manifest_bytes;
                let raw = read_capped(ContentReader::new(&mut stream), limit, || {
                    ArchiveError::ManifestTooLarge { limit }
                })?;
                let decoded = Arc::new(decode_manifest(&raw, &config)?);
                debug!(
                    path = %info.path,
                    bytes = raw.len(),
                    entries = decoded.entry_count(),
                    "manifest decoded from stream head"
                );
                if config.verify {
                    let raw: Arc<[u8]> = raw.into();
                    protocol = VerificationProtocol::new(factory.session(raw, decoded.clone()));
                }
                manifest = Some(decoded);
            }
            other => {
                debug!("stream does not start with a manifest");
                lookahead = other;
            }
        }

        Ok(Self {
            stream,
            config,
            manifest,
            protocol,
            pending: VecDeque::new(),
            lookahead,
            failure: None,
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Manifest decoded at open, if the stream started with one.
    pub fn manifest(&self) -> Option<&Arc<Manifest>> {
        self.manifest.as_ref()
    }

    /// Advance to the next entry. Unread content of the previous entry is
    /// skipped and, if it was being verified, left unverified.
    pub fn next_entry(
        &mut self,
    ) -> Result<Option<StreamEntry<'_, S, F::Verifier>>, ArchiveError> {
        if let Some(err) = &self.failure {
            return Err(err.clone().into());
        }
        if self.protocol.state() == GlobalState::CollectingMeta {
            self.collect_meta()?;
        }

        let (info, content) = if let Some(buffered) = self.pending.pop_front() {
            (buffered.info, StreamContent::Buffered(io::Cursor::new(buffered.bytes)))
        } else {
            let info = match self.lookahead.take() {
                Some(info) => info,
                None => match self.stream.next_entry()? {
                    Some(info) => info,
                    None => return Ok(None),
                },
            };
            (info, StreamContent::Live(ContentReader::new(&mut self.stream)))
        };

        let attributes = self
            .manifest
            .as_ref()
            .and_then(|m| m.entry(&info.path))
            .cloned();
        let desc = EntryDescriptor {
            path: &info.path,
            attributes: attributes.as_ref(),
            size: info.size,
        };
        let reader = self.protocol.wrap(&desc, content)?;
        Ok(Some(EntryReader::new(info, attributes, reader)))
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

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn collect_meta(&mut self) -> Result<(), ArchiveError> {
        let limit = self.config.max_meta_entry_bytes;
        while let Some(info) = self.stream.next_entry()? {
            if !is_meta_path(&info.path) {
                self.lookahead = Some(info);
                break;
            }
            if info.is_dir {
                self.pending.push_back(Buffered {
                    info,
                    bytes: Vec::new(),
                });
                continue;
            }

            let bytes = read_capped(ContentReader::new(&mut self.stream), limit, || {
                ArchiveError::MetaEntryTooLarge {
                    path: info.path.clone(),
                    limit,
                }
            })?;
            let desc = EntryDescriptor {
                path: &info.path,
                attributes: self.manifest.as_ref().and_then(|m| m.entry(&info.path)),
                size: Some(bytes.len() as u64),
            };
            if let Err(err) = self.protocol.feed_meta(&desc, &bytes) {
                self.failure = Some(err.clone());
                return Err(err.into());
            }
            self.pending.push_back(Buffered { info, bytes });
        }

        debug!(buffered = self.pending.len(), "metadata phase closed");
        self.protocol.done_with_meta();
        Ok(())
    }
}

impl<S: EntryStream, F: VerifierFactory> MetadataResolver for ArchiveStream<S, F> {
    fn resolve(&mut self) -> Result<Option<Arc<Manifest>>, ArchiveError> {
        Ok(self.manifest.clone())
    }
}
