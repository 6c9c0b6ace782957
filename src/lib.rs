//! Manifest codec and verifying readers for signed package archives.
//!
//! ## Scope
//! Package archives (jar-style zip or tar) carry a plain-text manifest at
//! `META-INF/MANIFEST.MF`: one block of main attributes plus one attribute
//! block per archive entry. This crate decodes and encodes that format and
//! reads archives while streaming every entry through an integrity verifier.
//!
//! ## Key invariants
//! - Manifest lines are bounded by a fixed line buffer; a line that does not
//!   terminate within it is rejected, never grown.
//! - Encoded lines are at most 72 bytes; longer values wrap with one-space
//!   continuation lines and decode back to the identical string.
//! - Every byte handed to a caller while verification is active has already
//!   been mirrored into the verifier session.
//! - Integrity failures surface on the read that discovers them and are never
//!   deferred past an entry's last byte.
//!
//! ## Flow
//! `Archive -> locate manifest -> decode -> verifier session -> metadata pass
//! -> per-entry verifying readers`
//!
//! ## Notable entry points
//! - [`Manifest`] / [`ManifestDecoder`]: the codec.
//! - [`ArchiveFile`]: random-access reader over a [`SeekableArchive`].
//! - [`ArchiveStream`]: sequential reader over an [`EntryStream`].
//! - [`verify::Verifier`]: the verifier session interface;
//!   [`verify::DigestVerifier`] is the built-in implementation.

pub mod archive;
pub mod errors;
pub mod manifest;
pub mod reader;
pub mod stdx;
pub mod verify;

pub use archive::{
    EntryInfo, EntryStream, MemArchive, ReaderConfig, SeekableArchive, TarEntryStream, ZipArchive,
};
pub use errors::{ArchiveError, ConfigError, FormatError, IntegrityError, ManifestError};
pub use manifest::{AttributeName, Attributes, Manifest, ManifestDecoder};
pub use reader::{ArchiveFile, ArchiveStream, EntryReader, MetadataResolver};
