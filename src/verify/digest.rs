//! Built-in digest verifier.
//!
//! Checks the digests a signed archive records about itself:
//! - Signature files (`META-INF/<stem>.SF`) are collected during the
//!   metadata phase and processed once a signature block file with the same
//!   stem has also been seen. Unpaired files are ignored.
//! - A signature file either digests the whole manifest
//!   (`<ALG>-Digest-Manifest`) or, failing that, its main section
//!   (`<ALG>-Digest-Manifest-Main-Attributes`) plus each listed entry's
//!   manifest section (`<ALG>-Digest`).
//! - Payload entries are hashed while they stream and compared against the
//!   manifest's `<ALG>-Digest` attributes for that entry.
//!
//! The block file's signature itself is not checked; a signer is identified
//! by its signature file stem.
//!
//! # Supported algorithms
//! SHA-224, SHA-256, SHA-384, SHA-512; values are standard base64. Other
//! algorithms are skipped with a warning.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use crate::archive::names::{signing_file, SigningFile};
use crate::errors::IntegrityError;
use crate::manifest::{Attributes, Manifest, ManifestDecoder, ManifestSections};
use crate::verify::{EntryDescriptor, Signer, Update, Verifier, VerifierFactory};

const ENTRY_DIGEST_SUFFIX: &str = "-Digest";
const MANIFEST_DIGEST_SUFFIX: &str = "-Digest-Manifest";
const MAIN_ATTRIBUTES_DIGEST_SUFFIX: &str = "-Digest-Manifest-Main-Attributes";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 4] = [Self::Sha224, Self::Sha256, Self::Sha384, Self::Sha512];

    /// Case-insensitive lookup by attribute prefix (`SHA-256`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_all([data])
    }

    /// Digest of the concatenation of `parts`.
    pub fn digest_all<'a>(self, parts: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
        let mut hasher = self.hasher();
        for part in parts {
            hasher.update(part);
        }
        hasher.finish()
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha224(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Hasher::Sha224(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// When a session has something to verify.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyPolicy {
    /// Only archives with at least one paired signature file.
    #[default]
    SignedOnly,
    /// Also check manifest entry digests of unsigned archives.
    AllDigests,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DigestVerifierFactory {
    pub policy: VerifyPolicy,
}

impl DigestVerifierFactory {
    pub fn new(policy: VerifyPolicy) -> Self {
        Self { policy }
    }
}

impl VerifierFactory for DigestVerifierFactory {
    type Verifier = DigestVerifier;

    fn session(&self, raw_manifest: Arc<[u8]>, manifest: Arc<Manifest>) -> DigestVerifier {
        DigestVerifier::new(self.policy, raw_manifest, manifest)
    }
}

struct SignatureFile {
    path: String,
    stem: String,
    bytes: Vec<u8>,
}

struct DigestCheck {
    algorithm: DigestAlgorithm,
    expected: Vec<u8>,
    hasher: Hasher,
}

enum Current {
    Idle,
    Meta {
        kind: SigningFile,
        path: String,
        stem: String,
        buf: Vec<u8>,
    },
    Entry {
        path: String,
        checks: Vec<DigestCheck>,
    },
}

pub struct DigestVerifier {
    policy: VerifyPolicy,
    raw_manifest: Arc<[u8]>,
    manifest: Arc<Manifest>,
    collecting: bool,

    /// Keyed by upper-cased stem.
    signature_files: AHashMap<String, SignatureFile>,
    block_stems: AHashSet<String>,
    processed: AHashSet<String>,

    /// Entry path -> signers whose signature file covers it.
    signed_paths: AHashMap<String, Vec<Signer>>,
    /// Finalized entries with at least one signer.
    verified: AHashMap<String, Vec<Signer>>,

    current: Current,
}

impl DigestVerifier {
    pub fn new(policy: VerifyPolicy, raw_manifest: Arc<[u8]>, manifest: Arc<Manifest>) -> Self {
        Self {
            policy,
            raw_manifest,
            manifest,
            collecting: true,
            signature_files: AHashMap::new(),
            block_stems: AHashSet::new(),
            processed: AHashSet::new(),
            signed_paths: AHashMap::new(),
            verified: AHashMap::new(),
            current: Current::Idle,
        }
    }

    /// Names of signature files that were paired and checked.
    pub fn signer_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.signature_files
            .iter()
            .filter(|(key, _)| self.processed.contains(*key))
            .map(|(_, sf)| sf.stem.as_str())
    }

    fn finish_meta(
        &mut self,
        kind: SigningFile,
        path: String,
        stem: String,
        buf: Vec<u8>,
    ) -> Result<(), IntegrityError> {
        let key = stem.to_ascii_uppercase();
        match kind {
            SigningFile::SignatureFile => {
                self.signature_files.insert(
                    key.clone(),
                    SignatureFile {
                        path,
                        stem,
                        bytes: buf,
                    },
                );
            }
            SigningFile::SignatureBlock => {
                self.block_stems.insert(key.clone());
            }
        }
        self.process_signer(&key)
    }

    /// Check a signature file once both halves of its pair are present.
    fn process_signer(&mut self, key: &str) -> Result<(), IntegrityError> {
        if self.processed.contains(key) || !self.block_stems.contains(key) {
            return Ok(());
        }
        let Some(sf) = self.signature_files.get(key) else {
            return Ok(());
        };
        self.processed.insert(key.to_string());

        let covered =
            check_signature_file(&sf.path, &sf.bytes, &self.raw_manifest, &self.manifest)?;
        let signer = Signer {
            name: sf.stem.clone(),
        };
        debug!(signer = %signer.name, entries = covered.len(), "signature file verified");
        for path in covered {
            self.signed_paths
                .entry(path)
                .or_default()
                .push(signer.clone());
        }
        Ok(())
    }

    fn begin_payload(&mut self, path: &str) -> Result<Current, IntegrityError> {
        let Some(attrs) = self.manifest.entry(path) else {
            return Ok(Current::Idle);
        };
        let recorded = recorded_digests(attrs, ENTRY_DIGEST_SUFFIX, path)?;
        if recorded.is_empty() {
            if self.signed_paths.contains_key(path) && !has_digest_attribute(attrs) {
                return Err(IntegrityError::MissingDigest {
                    path: path.to_string(),
                });
            }
            return Ok(Current::Idle);
        }
        let checks = recorded
            .into_iter()
            .map(|(algorithm, expected)| DigestCheck {
                algorithm,
                expected,
                hasher: algorithm.hasher(),
            })
            .collect();
        Ok(Current::Entry {
            path: path.to_string(),
            checks,
        })
    }

    fn finish_payload(
        &mut self,
        path: String,
        checks: Vec<DigestCheck>,
    ) -> Result<(), IntegrityError> {
        for check in checks {
            if check.hasher.finish() != check.expected {
                return Err(IntegrityError::EntryDigestMismatch {
                    path,
                    algorithm: check.algorithm.name().to_string(),
                });
            }
        }
        if let Some(signers) = self.signed_paths.get(&path) {
            self.verified.insert(path, signers.clone());
        }
        Ok(())
    }
}

impl Verifier for DigestVerifier {
    fn begin_entry(&mut self, entry: &EntryDescriptor<'_>) -> Result<(), IntegrityError> {
        self.current = Current::Idle;
        if self.collecting {
            if let Some((kind, stem)) = signing_file(entry.path) {
                self.current = Current::Meta {
                    kind,
                    path: entry.path.to_string(),
                    stem: stem.to_string(),
                    buf: Vec::with_capacity(entry.size.unwrap_or(0).min(64 * 1024) as usize),
                };
            }
            return Ok(());
        }
        self.current = self.begin_payload(entry.path)?;
        Ok(())
    }

    fn update(&mut self, update: Update<'_>) -> Result<(), IntegrityError> {
        match update {
            Update::Bytes(bytes) => {
                match &mut self.current {
                    Current::Idle => {}
                    Current::Meta { buf, .. } => buf.extend_from_slice(bytes),
                    Current::Entry { checks, .. } => {
                        for check in checks.iter_mut() {
                            check.hasher.update(bytes);
                        }
                    }
                }
                Ok(())
            }
            Update::End => match std::mem::replace(&mut self.current, Current::Idle) {
                Current::Idle => Ok(()),
                Current::Meta {
                    kind,
                    path,
                    stem,
                    buf,
                } => self.finish_meta(kind, path, stem, buf),
                Current::Entry { path, checks } => self.finish_payload(path, checks),
            },
        }
    }

    fn done_with_meta(&mut self) {
        self.collecting = false;
        self.current = Current::Idle;
        for (key, sf) in &self.signature_files {
            if !self.processed.contains(key) {
                warn!(signature_file = %sf.path, "signature file without matching block file");
            }
        }
        debug!(
            signed_entries = self.signed_paths.len(),
            "digest verifier finished metadata"
        );
    }

    fn nothing_to_verify(&self) -> bool {
        if !self.processed.is_empty() {
            return false;
        }
        match self.policy {
            VerifyPolicy::SignedOnly => true,
            VerifyPolicy::AllDigests => !self
                .manifest
                .entries()
                .any(|(_, attrs)| has_digest_attribute(attrs)),
        }
    }

    fn signers(&self, path: &str) -> Option<&[Signer]> {
        self.verified.get(path).map(Vec::as_slice)
    }
}

#[inline]
fn algorithm_prefix<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    // Attribute names are ASCII, so byte slicing is safe.
    let cut = name.len().checked_sub(suffix.len())?;
    (cut > 0 && name[cut..].eq_ignore_ascii_case(suffix)).then(|| &name[..cut])
}

fn has_digest_attribute(attrs: &Attributes) -> bool {
    attrs
        .names()
        .any(|n| algorithm_prefix(n.as_str(), ENTRY_DIGEST_SUFFIX).is_some())
}

/// Supported `<ALG><suffix>` attributes of `attrs`, decoded.
fn recorded_digests(
    attrs: &Attributes,
    suffix: &str,
    path: &str,
) -> Result<Vec<(DigestAlgorithm, Vec<u8>)>, IntegrityError> {
    let mut out = Vec::new();
    for (name, value) in attrs.iter() {
        let Some(prefix) = algorithm_prefix(name.as_str(), suffix) else {
            continue;
        };
        let Some(algorithm) = DigestAlgorithm::from_name(prefix) else {
            warn!(algorithm = prefix, path, "unsupported digest algorithm");
            continue;
        };
        let expected = STANDARD
            .decode(value.trim())
            .map_err(|_| IntegrityError::InvalidDigestValue {
                path: path.to_string(),
                algorithm: algorithm.name().to_string(),
            })?;
        out.push((algorithm, expected));
    }
    Ok(out)
}

/// Check one signature file against the manifest; returns the entry paths
/// it covers.
fn check_signature_file(
    sf_path: &str,
    sf_bytes: &[u8],
    raw_manifest: &[u8],
    manifest: &Manifest,
) -> Result<Vec<String>, IntegrityError> {
    let sf = ManifestDecoder::new()
        .decode_slice(sf_bytes)
        .map_err(|source| IntegrityError::InvalidSignatureFile {
            signature_file: sf_path.to_string(),
            source,
        })?;
    let sections = ManifestSections::parse(raw_manifest);

    let manifest_signed = recorded_digests(sf.main_attributes(), MANIFEST_DIGEST_SUFFIX, sf_path)?
        .into_iter()
        .any(|(alg, expected)| alg.digest(raw_manifest) == expected);

    if !manifest_signed {
        for (alg, expected) in
            recorded_digests(sf.main_attributes(), MAIN_ATTRIBUTES_DIGEST_SUFFIX, sf_path)?
        {
            if alg.digest(sections.main()) != expected {
                return Err(IntegrityError::MainAttributesDigestMismatch {
                    signature_file: sf_path.to_string(),
                    algorithm: alg.name().to_string(),
                });
            }
        }
    }

    let mut covered = Vec::with_capacity(sf.entry_count());
    for (name, attrs) in sf.entries() {
        if manifest.entry(name).is_none() {
            continue;
        }
        if manifest_signed {
            covered.push(name.to_string());
            continue;
        }
        let recorded = recorded_digests(attrs, ENTRY_DIGEST_SUFFIX, name)?;
        if recorded.is_empty() {
            continue;
        }
        for (alg, expected) in recorded {
            let Some(raw_sections) = sections.entry(name) else {
                continue;
            };
            if alg.digest_all(raw_sections) != expected {
                return Err(IntegrityError::SectionDigestMismatch {
                    signature_file: sf_path.to_string(),
                    path: name.to_string(),
                    algorithm: alg.name().to_string(),
                });
            }
        }
        covered.push(name.to_string());
    }
    Ok(covered)
}
