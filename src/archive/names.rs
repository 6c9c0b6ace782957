//! Reserved metadata-directory names and predicates.
//!
//! Archive member names are case-sensitive as stored. The predicates here
//! are the exceptions: the metadata directory, the manifest, and signature
//! files are recognized regardless of case.

/// Reserved directory marker entry.
pub const META_DIR: &str = "META-INF/";

/// Canonical manifest path.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Manifest file name inside `META_DIR`.
pub const MANIFEST_FILE: &str = "MANIFEST.MF";

const SIGNATURE_FILE_EXT: &str = ".SF";
const SIGNATURE_BLOCK_EXTS: [&str; 3] = [".RSA", ".DSA", ".EC"];

/// Kind of a signing-related metadata entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningFile {
    /// `META-INF/<stem>.SF`: digests over the manifest.
    SignatureFile,
    /// `META-INF/<stem>.{RSA,DSA,EC}`: the signature over the `.SF` file.
    SignatureBlock,
}

#[inline]
fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[inline]
fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(suffix) {
        Some(&s[..cut])
    } else {
        None
    }
}

/// True for the bare `META-INF/` directory entry.
#[inline]
pub fn is_meta_dir_marker(path: &str) -> bool {
    path.eq_ignore_ascii_case(META_DIR)
}

/// True for any entry under `META-INF/`, the marker itself included.
#[inline]
pub fn is_meta_path(path: &str) -> bool {
    strip_prefix_ignore_case(path, META_DIR).is_some()
}

/// True for `META-INF/MANIFEST.MF` in any case.
#[inline]
pub fn is_manifest_path(path: &str) -> bool {
    path.eq_ignore_ascii_case(MANIFEST_PATH)
}

/// Classify a signing-related file directly inside `META-INF/`.
///
/// Returns the kind plus the file stem used to pair `.SF` files with their
/// block files (`META-INF/CERT.SF` -> `CERT`). Nested paths never match.
pub fn signing_file(path: &str) -> Option<(SigningFile, &str)> {
    let file = strip_prefix_ignore_case(path, META_DIR)?;
    if file.contains('/') {
        return None;
    }
    if let Some(stem) = strip_suffix_ignore_case(file, SIGNATURE_FILE_EXT) {
        return (!stem.is_empty()).then_some((SigningFile::SignatureFile, stem));
    }
    SIGNATURE_BLOCK_EXTS.iter().find_map(|ext| {
        strip_suffix_ignore_case(file, ext)
            .filter(|stem| !stem.is_empty())
            .map(|stem| (SigningFile::SignatureBlock, stem))
    })
}
