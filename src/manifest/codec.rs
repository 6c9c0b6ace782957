//! Manifest value plus its text codec.
//!
//! # Format
//! - Header lines are `Name: Value`, terminated by `\n` or `\r\n`.
//! - A line starting with one space continues the previous value; the bytes
//!   after the space are appended with no separator.
//! - The first block holds the main attributes. Every later block is
//!   separated by one or more blank lines and opens with a `Name:` header
//!   naming the archive entry it describes.
//!
//! # Invariants
//! - Decoding never re-scans consumed bytes: each physical line is read once
//!   into a fixed line buffer and the only lookahead is one `peek`ed byte.
//! - Continuation pieces are joined as raw bytes and decoded as UTF-8 once,
//!   so a multi-byte character split by the encoder survives the round trip.
//! - Encoding wraps every logical line to physical lines of at most 72 bytes
//!   (see [`make_72_safe`]) and ends every line with CRLF.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};

use tracing::warn;

use crate::errors::{FormatError, ManifestError};
use crate::manifest::attributes::{names, AttributeName, Attributes};
use crate::manifest::line_scanner::{LineScanner, DEFAULT_SCAN_BUFFER_LEN};
use crate::stdx::OrderedMap;

/// Default bound on one physical line, terminator included.
pub const DEFAULT_MAX_LINE_LEN: usize = 512;

/// Longest physical line the encoder emits, terminator excluded.
pub const MAX_ENCODED_LINE_LEN: usize = 72;

/// Byte-wise prefix of a section-opening header (compared case-insensitively).
const NAME_HEADER_PREFIX: &[u8; 6] = b"name: ";

/// Decoded manifest: main attributes plus one attribute block per entry path.
#[derive(Clone, Default)]
pub struct Manifest {
    main: Attributes,
    entries: OrderedMap<String, Attributes>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode with default limits.
    pub fn read_from<R: Read>(reader: R) -> Result<Self, ManifestError> {
        ManifestDecoder::new().decode(reader)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        Self::read_from(bytes)
    }

    pub fn main_attributes(&self) -> &Attributes {
        &self.main
    }

    pub fn main_attributes_mut(&mut self) -> &mut Attributes {
        &mut self.main
    }

    /// Attributes for one entry path (exact, case-sensitive match).
    pub fn entry(&self, path: &str) -> Option<&Attributes> {
        self.entries.get(path)
    }

    pub fn entry_mut(&mut self, path: &str) -> Option<&mut Attributes> {
        self.entries.get_mut(path)
    }

    /// Attributes for `path`, created empty if absent.
    pub fn entry_or_insert(&mut self, path: impl Into<String>) -> &mut Attributes {
        self.entries.get_or_insert_with(path.into(), Attributes::new)
    }

    pub fn insert_entry(&mut self, path: impl Into<String>, attrs: Attributes) -> Option<Attributes> {
        self.entries.insert(path.into(), attrs)
    }

    pub fn remove_entry(&mut self, path: &str) -> Option<Attributes> {
        self.entries.remove(path)
    }

    /// Entries in insertion (or decode) order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = (&str, &Attributes)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.main.clear();
        self.entries.clear();
    }

    /// Copy the main attributes and every entry of `other` into `self`.
    ///
    /// Entry blocks are replaced wholesale, not merged pairwise.
    pub fn merge(&mut self, other: &Manifest) {
        self.main.extend_from(&other.main);
        for (path, attrs) in other.entries.iter() {
            self.entries.insert(path.clone(), attrs.clone());
        }
    }

    /// Serialize into `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), ManifestError> {
        let bytes = self.to_bytes()?;
        out.write_all(&bytes)?;
        Ok(())
    }

    /// Serialize to bytes.
    ///
    /// Main attributes come first, `Manifest-Version` (or, failing that,
    /// `Signature-Version`) leading. Each entry follows as a `Name:` header
    /// plus its attributes. Every block ends with a blank line.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::with_capacity(64 * (1 + self.entries.len()));
        let mut line = Vec::with_capacity(128);

        let lead = [names::MANIFEST_VERSION, names::SIGNATURE_VERSION]
            .into_iter()
            .find(|name| self.main.contains(name));
        if let Some(lead) = lead {
            if let Some(value) = self.main.get(lead) {
                let name = self
                    .main
                    .names()
                    .find(|n| n.eq_ignore_case(lead))
                    .map_or(lead, AttributeName::as_str);
                encode_header(&mut out, &mut line, name, value)?;
            }
        }
        for (name, value) in self.main.iter() {
            if lead.is_some_and(|lead| name.eq_ignore_case(lead)) {
                continue;
            }
            encode_header(&mut out, &mut line, name.as_str(), value)?;
        }
        out.extend_from_slice(b"\r\n");

        for (path, attrs) in self.entries.iter() {
            encode_header(&mut out, &mut line, names::NAME, path)?;
            for (name, value) in attrs.iter() {
                encode_header(&mut out, &mut line, name.as_str(), value)?;
            }
            out.extend_from_slice(b"\r\n");
        }
        Ok(out)
    }
}

fn encode_header(
    out: &mut Vec<u8>,
    line: &mut Vec<u8>,
    name: &str,
    value: &str,
) -> Result<(), FormatError> {
    if value.bytes().any(|b| b == b'\n' || b == b'\r') {
        return Err(FormatError::NewlineInValue {
            name: name.to_string(),
        });
    }
    line.clear();
    line.extend_from_slice(name.as_bytes());
    line.extend_from_slice(b": ");
    line.extend_from_slice(value.as_bytes());
    line.extend_from_slice(b"\r\n");
    make_72_safe(line);
    out.extend_from_slice(line);
    Ok(())
}

/// Hard-wrap one CRLF-terminated logical line in place.
///
/// When the line (terminator included) exceeds 72 bytes, `"\r\n "` is
/// inserted at offset 70 and then every 72 bytes of the grown buffer until
/// the remaining tail fits. Offsets count the terminator, so the anchor is 70
/// rather than 72; decoders in the wild rely on this exact layout.
pub fn make_72_safe(line: &mut Vec<u8>) {
    let mut length = line.len();
    if length <= MAX_ENCODED_LINE_LEN {
        return;
    }
    let mut index = MAX_ENCODED_LINE_LEN - 2;
    while index < length - 2 {
        line.splice(index..index, *b"\r\n ");
        index += MAX_ENCODED_LINE_LEN;
        length += 3;
    }
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.main == other.main && self.entries.same_pairs(&other.entries)
    }
}

impl Eq for Manifest {}

impl Hash for Manifest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.main.hash(state);
        let mut entries: Vec<(&String, &Attributes)> = self.entries.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.hash(state);
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("main", &self.main)
            .field("entries", &DebugEntries(&self.entries))
            .finish()
    }
}

struct DebugEntries<'a>(&'a OrderedMap<String, Attributes>);

impl fmt::Debug for DebugEntries<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

/// Manifest decoder with explicit buffer limits.
#[derive(Clone, Copy, Debug)]
pub struct ManifestDecoder {
    max_line_len: usize,
    scan_buffer_len: usize,
}

impl Default for ManifestDecoder {
    fn default() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            scan_buffer_len: DEFAULT_SCAN_BUFFER_LEN,
        }
    }
}

impl ManifestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on one physical line, terminator included. Clamped to >= 2.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len.max(2);
        self
    }

    /// Clamped to >= 1.
    pub fn with_scan_buffer_len(mut self, scan_buffer_len: usize) -> Self {
        self.scan_buffer_len = scan_buffer_len.max(1);
        self
    }

    /// Decode a whole manifest. Never returns a partial result.
    pub fn decode<R: Read>(&self, reader: R) -> Result<Manifest, ManifestError> {
        let mut lines = Lines {
            scanner: LineScanner::with_capacity(self.scan_buffer_len, reader),
            buf: vec![0u8; self.max_line_len],
            line_no: 0,
        };
        let mut manifest = Manifest::new();
        lines.read_block(&mut manifest.main)?;

        let mut estimate = CapacityEstimate::default();
        while let Some(len) = lines.next_line()? {
            if len == 0 {
                continue;
            }
            let line = &lines.buf[..len];
            if len < NAME_HEADER_PREFIX.len()
                || !line[..NAME_HEADER_PREFIX.len()].eq_ignore_ascii_case(NAME_HEADER_PREFIX)
            {
                return Err(FormatError::MissingNameHeader {
                    line: lines.line_no,
                }
                .into());
            }
            let first_line = lines.line_no;
            let mut path = line[NAME_HEADER_PREFIX.len()..].to_vec();
            while lines.scanner.peek()? == Some(b' ') {
                let Some(len) = lines.next_line()? else {
                    break;
                };
                path.extend_from_slice(&lines.buf[1..len]);
            }
            let path = String::from_utf8(path)
                .map_err(|_| FormatError::InvalidUtf8 { line: first_line })?;

            let cap_hint = estimate.hint();
            let attrs = manifest
                .entries
                .get_or_insert_with(path, || Attributes::with_capacity(cap_hint));
            let before = attrs.len();
            lines.read_block(attrs)?;
            estimate.record(attrs.len() - before);
        }
        Ok(manifest)
    }

    /// Decode bytes already in memory; only format errors are possible.
    pub fn decode_slice(&self, bytes: &[u8]) -> Result<Manifest, FormatError> {
        match self.decode(bytes) {
            Ok(manifest) => Ok(manifest),
            Err(ManifestError::Format(err)) => Err(err),
            Err(ManifestError::Io(err)) => unreachable!("in-memory read failed: {err}"),
        }
    }
}

/// Running average of attributes per entry section, used to size new blocks.
///
/// A repeated `Name:` section merges into the existing block, so only the
/// attributes it adds are counted.
#[derive(Default)]
struct CapacityEstimate {
    sections: usize,
    pairs: usize,
}

impl CapacityEstimate {
    fn hint(&self) -> usize {
        match self.sections {
            0 => 2,
            n => (self.pairs / n).max(2),
        }
    }

    fn record(&mut self, added: usize) {
        self.sections += 1;
        self.pairs += added;
    }
}

/// Physical-line reader over a `LineScanner` with one reusable line buffer.
struct Lines<R> {
    scanner: LineScanner<R>,
    buf: Vec<u8>,
    line_no: usize,
}

impl<R: Read> Lines<R> {
    /// Read one physical line into `buf` and return its length without the
    /// terminator; `None` at end of stream.
    fn next_line(&mut self) -> Result<Option<usize>, ManifestError> {
        let Some(n) = self.scanner.read_line(&mut self.buf)? else {
            return Ok(None);
        };
        self.line_no += 1;
        if self.buf[n - 1] != b'\n' {
            let line = self.line_no;
            return Err(if n == self.buf.len() {
                FormatError::LineTooLong { line }
            } else {
                FormatError::TruncatedLine { line }
            }
            .into());
        }
        let mut len = n - 1;
        if len > 0 && self.buf[len - 1] == b'\r' {
            len -= 1;
        }
        Ok(Some(len))
    }

    /// Read header lines into `attrs` until a blank line or end of stream.
    fn read_block(&mut self, attrs: &mut Attributes) -> Result<(), ManifestError> {
        let mut pending: Option<(AttributeName, Vec<u8>, usize)> = None;
        while let Some(len) = self.next_line()? {
            if len == 0 {
                break;
            }
            let line_no = self.line_no;
            let line = &self.buf[..len];
            if line[0] == b' ' {
                let Some((_, value, _)) = pending.as_mut() else {
                    return Err(FormatError::MisplacedContinuation { line: line_no }.into());
                };
                value.extend_from_slice(&line[1..]);
            } else {
                let (name, value_start) = parse_header(line, line_no)?;
                pending = Some((name, line[value_start..].to_vec(), line_no));
            }

            if self.scanner.peek()? == Some(b' ') {
                continue;
            }
            let Some((name, value, first_line)) = pending.take() else {
                continue;
            };
            let value = String::from_utf8(value)
                .map_err(|_| FormatError::InvalidUtf8 { line: first_line })?;
            let dup = name.to_string();
            if attrs.insert(name, value).is_some() {
                warn!(name = %dup, line = first_line, "duplicate attribute in manifest block");
            }
        }
        Ok(())
    }
}

/// Split `Name: value` into a validated name and the value's start offset.
fn parse_header(line: &[u8], line_no: usize) -> Result<(AttributeName, usize), FormatError> {
    let colon = memchr::memchr(b':', line).ok_or(FormatError::InvalidHeader { line: line_no })?;
    if line.get(colon + 1) != Some(&b' ') {
        return Err(FormatError::InvalidHeader { line: line_no });
    }
    let raw = &line[..colon];
    let name = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| AttributeName::new(s).ok())
        .ok_or_else(|| FormatError::InvalidName {
            line: line_no,
            name: String::from_utf8_lossy(raw).into_owned(),
        })?;
    Ok((name, colon + 2))
}
