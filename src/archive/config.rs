//! Reader policy and hard limits.
//!
//! # Invariants
//! - All limits are hard bounds and must be internally consistent.
//! - Archives are treated as hostile input: entry sizes and manifest lines are
//!   untrusted.
//!
//! # Design Notes
//! - Defaults are safety-first: verification is enabled by default.
//! - The same limits apply to random-access and sequential readers.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::manifest::{DEFAULT_MAX_LINE_LEN, DEFAULT_SCAN_BUFFER_LEN, MAX_ENCODED_LINE_LEN};

/// Smallest accepted `max_line_len`: one wrapped line plus CRLF.
pub const MIN_MAX_LINE_LEN: usize = MAX_ENCODED_LINE_LEN + 2;

/// Shared reader configuration (random-access + sequential).
///
/// All limits are hard bounds. Metadata entries are buffered whole before
/// they reach the verifier, so their sizes are capped here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Create a verifier session when a manifest is found.
    pub verify: bool,

    /// Line scanner internal buffer size.
    pub scan_buffer_len: usize,
    /// Maximum physical manifest line, terminator included.
    pub max_line_len: usize,

    /// Maximum manifest entry size.
    pub max_manifest_bytes: u64,
    /// Maximum size of each metadata entry fed to the verifier.
    pub max_meta_entry_bytes: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            verify: true,

            scan_buffer_len: DEFAULT_SCAN_BUFFER_LEN,
            max_line_len: DEFAULT_MAX_LINE_LEN,

            max_manifest_bytes: 8 * 1024 * 1024,    // 8 MiB
            max_meta_entry_bytes: 16 * 1024 * 1024, // 16 MiB
        }
    }
}

impl ReaderConfig {
    /// Validate cross-field invariants.
    ///
    /// Intended to catch configuration mistakes early; readers call it once
    /// on open.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_buffer_len == 0 {
            return Err(ConfigError::ScanBufferLenZero);
        }
        if self.max_line_len < MIN_MAX_LINE_LEN {
            return Err(ConfigError::MaxLineLenTooSmall {
                got: self.max_line_len,
                min: MIN_MAX_LINE_LEN,
            });
        }
        if self.max_manifest_bytes == 0 {
            return Err(ConfigError::MaxManifestBytesZero);
        }
        if self.max_meta_entry_bytes == 0 {
            return Err(ConfigError::MaxMetaEntryBytesZero);
        }
        if self.max_meta_entry_bytes < self.max_manifest_bytes {
            return Err(ConfigError::MetaCapBelowManifestCap {
                manifest: self.max_manifest_bytes,
                meta: self.max_meta_entry_bytes,
            });
        }
        Ok(())
    }

    /// Same limits with verification turned off.
    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }
}
