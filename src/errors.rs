//! Error types for manifest decoding, verification, and archive reading.
//!
//! Errors are stage-specific: the codec reports `FormatError`, the verifier
//! reports `IntegrityError`, configuration checks report `ConfigError`, and
//! the archive readers fold all of them into `ArchiveError`. All enums are
//! `#[non_exhaustive]`; consumers should include a fallback match arm.
//!
//! # Design Notes
//! - Line numbers in `FormatError` are 1-based physical lines.
//! - I/O errors preserve their source.
//! - Entry readers implement `std::io::Read`, so an `IntegrityError` raised
//!   mid-read travels inside an `io::Error` of kind `InvalidData`.
//!   `ArchiveError::from(io::Error)` recovers it losslessly.

use std::io;

use thiserror::Error;

/// Malformed manifest bytes (or an unencodable manifest value).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FormatError {
    /// A physical line did not end within the scan line buffer.
    #[error("manifest line {line} too long")]
    LineTooLong { line: usize },
    /// The stream ended in the middle of a line (no terminating newline).
    #[error("manifest line {line} is truncated (no trailing newline)")]
    TruncatedLine { line: usize },
    /// A per-entry section did not start with a `Name:` header.
    #[error("manifest section at line {line} does not start with a Name header")]
    MissingNameHeader { line: usize },
    /// A continuation line appeared before any header in its block.
    #[error("misplaced continuation line {line}")]
    MisplacedContinuation { line: usize },
    /// A header line lacked the `": "` separator.
    #[error("invalid header field at line {line}")]
    InvalidHeader { line: usize },
    /// A header name is not a valid attribute name.
    #[error("invalid header field name {name:?} at line {line}")]
    InvalidName { line: usize, name: String },
    /// A header value (or entry name) is not valid UTF-8.
    #[error("invalid UTF-8 in manifest at line {line}")]
    InvalidUtf8 { line: usize },
    /// A value contains a line break and cannot be encoded.
    #[error("value of {name} contains a line break")]
    NewlineInValue { name: String },
}

/// Codec-level failure: malformed bytes or an I/O failure of the byte source.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A computed digest disagrees with its recorded value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IntegrityError {
    /// Entry bytes do not match the manifest's digest for that entry.
    #[error("{algorithm} digest mismatch for entry {path}")]
    EntryDigestMismatch { path: String, algorithm: String },
    /// A signature file's whole-manifest digest does not match.
    #[error("invalid {algorithm} manifest digest in signature file {signature_file}")]
    ManifestDigestMismatch {
        signature_file: String,
        algorithm: String,
    },
    /// A signature file's main-attributes digest does not match.
    #[error("invalid {algorithm} main-attributes digest in signature file {signature_file}")]
    MainAttributesDigestMismatch {
        signature_file: String,
        algorithm: String,
    },
    /// A signature file's digest of one manifest section does not match.
    #[error("invalid {algorithm} signature file digest for {path} in {signature_file}")]
    SectionDigestMismatch {
        signature_file: String,
        path: String,
        algorithm: String,
    },
    /// A signature file could not be parsed.
    #[error("malformed signature file {signature_file}: {source}")]
    InvalidSignatureFile {
        signature_file: String,
        #[source]
        source: FormatError,
    },
    /// A recorded digest value is not valid base64.
    #[error("undecodable {algorithm} digest value for {path}")]
    InvalidDigestValue { path: String, algorithm: String },
    /// A signed entry's manifest section carries no usable digest.
    #[error("digest missing for signed entry {path}")]
    MissingDigest { path: String },
}

impl IntegrityError {
    /// Wrap for transport through `std::io::Read`.
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

/// Validation error returned by `ReaderConfig::validate`.
///
/// Callers should treat this as a configuration bug, not hostile input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("scan_buffer_len must be > 0")]
    ScanBufferLenZero,
    #[error("max_line_len must be >= {min} (got {got})")]
    MaxLineLenTooSmall { got: usize, min: usize },
    #[error("max_manifest_bytes must be > 0")]
    MaxManifestBytesZero,
    #[error("max_meta_entry_bytes must be > 0")]
    MaxMetaEntryBytesZero,
    #[error(
        "max_meta_entry_bytes must be >= max_manifest_bytes (manifest={manifest}, meta={meta})"
    )]
    MetaCapBelowManifestCap { manifest: u64, meta: u64 },
}

/// Top-level error for archive readers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The manifest entry exceeds `max_manifest_bytes`.
    #[error("manifest exceeds {limit} bytes")]
    ManifestTooLarge { limit: u64 },
    /// A metadata entry exceeds `max_meta_entry_bytes`.
    #[error("metadata entry {path} exceeds {limit} bytes")]
    MetaEntryTooLarge { path: String, limit: u64 },
}

impl ArchiveError {
    /// Returns the integrity failure, if this is one.
    pub fn as_integrity(&self) -> Option<&IntegrityError> {
        match self {
            Self::Integrity(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        let carries_integrity = err
            .get_ref()
            .is_some_and(|inner| inner.is::<IntegrityError>());
        if !carries_integrity {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<IntegrityError>()) {
            Some(Ok(integrity)) => Self::Integrity(*integrity),
            // `is` said yes; keep a generic error if the downcast disagrees.
            _ => Self::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "integrity failure",
            )),
        }
    }
}

impl From<ManifestError> for ArchiveError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Format(e) => Self::Format(e),
            ManifestError::Io(e) => Self::from(e),
        }
    }
}
