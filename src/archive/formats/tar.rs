//! Sequential ustar reader.
//!
//! # Invariants
//! - Parsing is sequential; no seeks are performed.
//! - Size fields are untrusted; overflow or short reads are treated as
//!   malformed (`InvalidData` / `UnexpectedEof`).
//! - Unread payload and block padding of the current entry are skipped
//!   before the next header is read.
//!
//! # Algorithm
//! - Read 512-byte header blocks; two zero blocks (or clean EOF at a header
//!   boundary) end the archive.
//! - Resolve GNU longname (`L`) and PAX `path=` overrides for the next entry.
//! - Yield regular files (typeflag `0`/NUL) and directories (`5`); every
//!   other type is skipped along with its payload.
//!
//! # Design Notes
//! - Global PAX headers (`g`) are consumed but never applied.
//! - Metadata-only records are buffered whole and capped at
//!   `MAX_META_RECORD_LEN`.

use std::io::{self, Read};

use tracing::trace;

use crate::archive::{EntryInfo, EntryStream};

pub const TAR_BLOCK_LEN: usize = 512;
pub const USTAR_MAGIC_OFFSET: usize = 257;

/// Upper bound for GNU longname and PAX header payloads.
pub const MAX_META_RECORD_LEN: u64 = 1024 * 1024;

const TYPE_REGULAR: u8 = b'0';
const TYPE_REGULAR_OLD: u8 = 0;
const TYPE_DIR: u8 = b'5';
const TYPE_GNU_LONGNAME: u8 = b'L';
const TYPE_PAX: u8 = b'x';
const TYPE_PAX_GLOBAL: u8 = b'g';

#[inline(always)]
pub fn is_ustar_header(header: &[u8]) -> bool {
    header.len() >= TAR_BLOCK_LEN && &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5] == b"ustar"
}

/// Tar archive as an ordered entry stream.
pub struct TarEntryStream<R> {
    input: R,
    hdr: [u8; TAR_BLOCK_LEN],
    /// Unread payload bytes of the current entry.
    remaining: u64,
    /// Padding after the current entry's payload.
    pad: u64,
    done: bool,

    // Per-file overrides (apply to next real entry only).
    gnu_longname: Vec<u8>,
    pax_path: Vec<u8>,

    discard: Box<[u8]>,
}

impl<R: Read> TarEntryStream<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            hdr: [0; TAR_BLOCK_LEN],
            remaining: 0,
            pad: 0,
            done: false,
            gnu_longname: Vec::new(),
            pax_path: Vec::new(),
            discard: vec![0u8; 8192].into_boxed_slice(),
        }
    }

    pub fn into_inner(self) -> R {
        self.input
    }

    fn skip_current(&mut self) -> io::Result<()> {
        let n = self.remaining.saturating_add(self.pad);
        self.remaining = 0;
        self.pad = 0;
        self.skip_bytes(n)
    }

    fn skip_bytes(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            let step = (self.discard.len() as u64).min(n) as usize;
            read_exact_n(&mut self.input, &mut self.discard[..step])?;
            n -= step as u64;
        }
        Ok(())
    }

    /// Read a metadata record payload (plus its padding) into memory.
    fn read_record(&mut self, size: u64) -> io::Result<Vec<u8>> {
        if size > MAX_META_RECORD_LEN {
            return Err(malformed("metadata record too large"));
        }
        let mut buf = vec![0u8; size as usize];
        read_exact_n(&mut self.input, &mut buf)?;
        self.skip_bytes(tar_pad(size))?;
        Ok(buf)
    }
}

impl<R: Read> EntryStream for TarEntryStream<R> {
    fn next_entry(&mut self) -> io::Result<Option<EntryInfo>> {
        if self.done {
            return Ok(None);
        }
        self.skip_current()?;

        let mut zero_blocks = 0u8;
        loop {
            if !read_exact_or_eof(&mut self.input, &mut self.hdr)? {
                // Clean EOF at header boundary.
                self.done = true;
                return Ok(None);
            }
            if is_zero_block(&self.hdr) {
                zero_blocks += 1;
                if zero_blocks >= 2 {
                    self.done = true;
                    return Ok(None);
                }
                continue;
            }
            zero_blocks = 0;

            let typeflag = self.hdr[156];
            let size = parse_tar_size_octal(&self.hdr[124..136])
                .ok_or_else(|| malformed("bad size field"))?;

            match typeflag {
                TYPE_GNU_LONGNAME => {
                    let mut name = self.read_record(size)?;
                    while matches!(name.last(), Some(0) | Some(b'\n')) {
                        name.pop();
                    }
                    self.gnu_longname = name;
                    continue;
                }
                TYPE_PAX => {
                    let record = self.read_record(size)?;
                    if let Some(path) = pax_path(&record) {
                        self.pax_path = path.to_vec();
                    }
                    continue;
                }
                TYPE_PAX_GLOBAL => {
                    self.skip_bytes(size.saturating_add(tar_pad(size)))?;
                    continue;
                }
                _ => {}
            }

            // Compute base name from header, then apply overrides.
            let mut name = build_ustar_name(&self.hdr);
            if !self.pax_path.is_empty() {
                name = std::mem::take(&mut self.pax_path);
            } else if !self.gnu_longname.is_empty() {
                name = std::mem::take(&mut self.gnu_longname);
            }
            // Overrides apply to exactly one real entry.
            self.pax_path.clear();
            self.gnu_longname.clear();

            self.remaining = size;
            self.pad = tar_pad(size);

            let mut path = String::from_utf8_lossy(&name).into_owned();
            match typeflag {
                TYPE_REGULAR | TYPE_REGULAR_OLD => {
                    return Ok(Some(EntryInfo::file(path, Some(size))));
                }
                TYPE_DIR => {
                    if !path.ends_with('/') {
                        path.push('/');
                    }
                    return Ok(Some(EntryInfo::dir(path)));
                }
                other => {
                    trace!(path = %path, typeflag = other, "skipping non-file tar entry");
                    self.skip_current()?;
                }
            }
        }
    }

    fn read_content(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || dst.is_empty() {
            return Ok(0);
        }
        let max = self.remaining.min(dst.len() as u64) as usize;
        let n = read_some(&mut self.input, &mut dst[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tar entry truncated",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[inline(always)]
fn tar_pad(size: u64) -> u64 {
    let rem = size % TAR_BLOCK_LEN as u64;
    if rem == 0 {
        0
    } else {
        TAR_BLOCK_LEN as u64 - rem
    }
}

#[inline(always)]
fn is_zero_block(b: &[u8; TAR_BLOCK_LEN]) -> bool {
    b.iter().all(|&x| x == 0)
}

fn build_ustar_name(hdr: &[u8; TAR_BLOCK_LEN]) -> Vec<u8> {
    let name = cstr_bytes(&hdr[0..100]);
    let prefix = cstr_bytes(&hdr[345..500]);

    let mut out = Vec::with_capacity(prefix.len() + 1 + name.len());
    if is_ustar_header(hdr) && !prefix.is_empty() {
        out.extend_from_slice(prefix);
        if !out.ends_with(b"/") {
            out.push(b'/');
        }
    }
    out.extend_from_slice(name);
    out
}

fn cstr_bytes(field: &[u8]) -> &[u8] {
    match memchr::memchr(0, field) {
        Some(i) => &field[..i],
        None => field,
    }
}

fn parse_tar_size_octal(field: &[u8]) -> Option<u64> {
    // tar size field is NUL/space padded octal.
    let mut i = 0;
    while i < field.len() && (field[i] == 0 || field[i] == b' ') {
        i += 1;
    }
    let mut end = i;
    while end < field.len() && (b'0'..=b'7').contains(&field[end]) {
        end += 1;
    }
    if end == i {
        return Some(0);
    }
    let mut v: u64 = 0;
    for &d in &field[i..end] {
        v = v.checked_mul(8)?;
        v = v.checked_add((d - b'0') as u64)?;
    }
    Some(v)
}

/// Last `path=` value of a PAX extended header, if any.
///
/// Records are `"<len> <key>=<value>\n"` where `len` counts the whole
/// record. Parsing stops at the first malformed record.
fn pax_path(mut records: &[u8]) -> Option<&[u8]> {
    let mut path = None;
    while !records.is_empty() {
        let Some(space) = memchr::memchr(b' ', records) else {
            break;
        };
        let digits = &records[..space];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            break;
        }
        let Some(rec_len) = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        else {
            break;
        };
        if rec_len <= space || rec_len > records.len() {
            break;
        }

        let rec = &records[space + 1..rec_len];
        if let Some(eq) = memchr::memchr(b'=', rec) {
            let mut val = &rec[eq + 1..];
            if val.last() == Some(&b'\n') {
                val = &val[..val.len() - 1];
            }
            if &rec[..eq] == b"path" {
                path = Some(val);
            }
        }
        records = &records[rec_len..];
    }
    path
}

fn read_some<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> io::Result<usize> {
    loop {
        match r.read(dst) {
            Ok(n) => return Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn read_exact_or_eof<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> io::Result<bool> {
    let mut off = 0;
    while off < dst.len() {
        let n = read_some(r, &mut dst[off..])?;
        if n == 0 {
            // EOF before full block: clean EOF only if nothing was read.
            if off == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tar truncated header",
            ));
        }
        off += n;
    }
    Ok(true)
}

fn read_exact_n<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> io::Result<()> {
    if read_exact_or_eof(r, dst)? || dst.is_empty() {
        return Ok(());
    }
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "tar truncated"))
}

fn malformed(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed tar: {what}"))
}
