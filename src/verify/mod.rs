//! Verifier collaborator interface and the protocol that drives it.
//!
//! # Scope
//! A verifier session is bound to one archive open. The readers drive it
//! through [`protocol::VerificationProtocol`]:
//! - `CollectingMeta`: every metadata entry is fed whole (begin, one
//!   `Update::Bytes`, `Update::End`).
//! - `done_with_meta` ends collection. A session reporting
//!   `nothing_to_verify` is dropped and every entry passes through
//!   unverified.
//! - `Active`: each payload entry is mirrored chunk by chunk into the session
//!   and finalized with `Update::End`.
//!
//! # Design Notes
//! - The codec and readers never touch digests; [`digest::DigestVerifier`]
//!   is the built-in session.
//! - Sessions see the exact manifest bytes that were decoded, never a
//!   re-encoded copy.

use std::sync::Arc;

use crate::errors::IntegrityError;
use crate::manifest::{Attributes, Manifest};

pub mod digest;
pub mod protocol;

pub use digest::{DigestAlgorithm, DigestVerifier, DigestVerifierFactory, VerifyPolicy};
pub use protocol::{EntryState, GlobalState, VerificationProtocol, VerifyingReader};

/// One entry as presented to a verifier session.
#[derive(Clone, Copy, Debug)]
pub struct EntryDescriptor<'a> {
    pub path: &'a str,
    /// Manifest attributes recorded for `path`, if any.
    pub attributes: Option<&'a Attributes>,
    /// Uncompressed size when known.
    pub size: Option<u64>,
}

/// Data delivered to a session for the current entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Update<'a> {
    Bytes(&'a [u8]),
    /// No more data; finalize the entry.
    End,
}

/// Identity of a party whose signature covers an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signer {
    /// Signature file stem (`META-INF/<name>.SF`).
    pub name: String,
}

/// One verifier session.
pub trait Verifier {
    /// Start a new entry. Any unfinished previous entry is abandoned.
    fn begin_entry(&mut self, entry: &EntryDescriptor<'_>) -> Result<(), IntegrityError>;

    /// Feed bytes of the current entry, or finalize it with `Update::End`.
    fn update(&mut self, update: Update<'_>) -> Result<(), IntegrityError>;

    /// All metadata entries have been fed.
    fn done_with_meta(&mut self);

    /// Only meaningful after `done_with_meta`.
    fn nothing_to_verify(&self) -> bool;

    /// Signers of a finalized entry, if any.
    fn signers(&self, path: &str) -> Option<&[Signer]>;
}

/// Creates one session per archive open.
pub trait VerifierFactory {
    type Verifier: Verifier;

    fn session(&self, raw_manifest: Arc<[u8]>, manifest: Arc<Manifest>) -> Self::Verifier;
}
