//! Seekable Zip32 reader.
//!
//! # Invariants
//! - All sizes/offsets are untrusted and validated against the source length.
//! - The central directory is read once on open into an entry table plus a
//!   path index; payload reads seek the same source.
//!
//! # Supported
//! - Zip32 (EOCD + central directory).
//! - Entries: stored (method 0) and deflate (method 8).
//!
//! # Not Supported
//! - Zip64 (sentinel 0xFFFF/0xFFFFFFFF fields).
//! - Multi-disk archives.
//! - Encrypted entries (flag bit 0): listed, but opening one fails with
//!   `ErrorKind::Unsupported`.
//!
//! # Design Notes
//! - Names are decoded as UTF-8, lossily; invalid bytes become U+FFFD.
//! - `flate2::read::DeflateDecoder` does the inflation.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use ahash::AHashMap;
use flate2::read::DeflateDecoder;
use tracing::debug;

use crate::archive::{EntryInfo, SeekableArchive};

/// ZIP signatures are `PK..`.
///
/// Common ones:
/// - Local file header:      PK 03 04
/// - Central directory:      PK 01 02
/// - End of central dir:     PK 05 06
/// - Data descriptor:        PK 07 08
#[inline(always)]
pub fn is_zip_magic(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }
    if header[0] != b'P' || header[1] != b'K' {
        return false;
    }
    matches!((header[2], header[3]), (1, 2) | (3, 4) | (5, 6) | (7, 8))
}

const SIG_EOCD: u32 = 0x0605_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_LFH: u32 = 0x0403_4b50;

const EOCD_MIN_LEN: usize = 22;
const EOCD_SEARCH_MAX: usize = 66 * 1024; // 64 KiB comment + header margin

/// Central directory fixed header length.
const CDFH_LEN: usize = 46;
/// Local file header fixed length.
const LFH_LEN: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// Central-directory fields needed to open an entry later.
#[derive(Clone, Copy, Debug)]
struct ZipRecord {
    flags: u16,
    method: u16,
    compressed_size: u64,
    local_header_offset: u64,
}

/// Zip32 archive over any seekable byte source.
pub struct ZipArchive<R> {
    reader: R,
    source_len: u64,
    entries: Vec<EntryInfo>,
    records: Vec<ZipRecord>,
    /// First occurrence of each path.
    index: AHashMap<String, usize>,
}

impl ZipArchive<File> {
    pub fn open_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Locate the end-of-central-directory record and read the whole
    /// central directory.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let source_len = reader.seek(SeekFrom::End(0))?;
        if source_len < EOCD_MIN_LEN as u64 {
            return Err(malformed("source shorter than end-of-central-directory record"));
        }

        // Read tail window.
        let win_len = (source_len as usize).min(EOCD_SEARCH_MAX);
        let win_off = source_len - win_len as u64;
        let mut win = vec![0u8; win_len];
        reader.seek(SeekFrom::Start(win_off))?;
        read_exact_n(&mut reader, &mut win)?;

        let eocd_rel = find_eocd(&win).ok_or_else(|| malformed("end of central directory not found"))?;
        let eocd = &win[eocd_rel..];

        let disk_no = le_u16(&eocd[4..6]);
        let cd_disk = le_u16(&eocd[6..8]);
        let entries_disk = le_u16(&eocd[8..10]);
        let entries_total = le_u16(&eocd[10..12]);
        let cd_size = le_u32(&eocd[12..16]);
        let cd_off = le_u32(&eocd[16..20]);

        if disk_no != 0 || cd_disk != 0 || entries_disk != entries_total {
            return Err(unsupported("multi-disk archive"));
        }
        if entries_total == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_off == 0xFFFF_FFFF {
            return Err(unsupported("zip64 archive"));
        }

        let cd_off = cd_off as u64;
        let cd_end = cd_off.saturating_add(cd_size as u64);
        if cd_off > source_len || cd_end > source_len {
            return Err(malformed("central directory out of bounds"));
        }

        let mut cd = vec![0u8; cd_size as usize];
        reader.seek(SeekFrom::Start(cd_off))?;
        read_exact_n(&mut reader, &mut cd)?;

        let count = entries_total as usize;
        let mut entries = Vec::with_capacity(count);
        let mut records = Vec::with_capacity(count);
        let mut index = AHashMap::with_capacity(count);

        let mut pos = 0usize;
        for _ in 0..count {
            let hdr = cd
                .get(pos..pos + CDFH_LEN)
                .ok_or_else(|| malformed("central directory truncated"))?;
            if le_u32(&hdr[0..4]) != SIG_CDFH {
                return Err(malformed("bad central directory signature"));
            }

            let flags = le_u16(&hdr[8..10]);
            let method = le_u16(&hdr[10..12]);
            let comp_size = le_u32(&hdr[20..24]);
            let uncomp_size = le_u32(&hdr[24..28]);
            let name_len = le_u16(&hdr[28..30]) as usize;
            let extra_len = le_u16(&hdr[30..32]) as usize;
            let comment_len = le_u16(&hdr[32..34]) as usize;
            let lfh_off = le_u32(&hdr[42..46]);

            if comp_size == 0xFFFF_FFFF || uncomp_size == 0xFFFF_FFFF || lfh_off == 0xFFFF_FFFF {
                return Err(unsupported("zip64 entry"));
            }
            if (lfh_off as u64).saturating_add(LFH_LEN as u64) > source_len {
                return Err(malformed("local header offset out of bounds"));
            }

            let name_start = pos + CDFH_LEN;
            let name = cd
                .get(name_start..name_start + name_len)
                .ok_or_else(|| malformed("central directory truncated"))?;
            let path = String::from_utf8_lossy(name).into_owned();
            pos = name_start + name_len + extra_len + comment_len;

            let is_dir = path.ends_with('/');
            let idx = entries.len();
            index.entry(path.clone()).or_insert(idx);
            entries.push(EntryInfo {
                path,
                size: Some(uncomp_size as u64),
                is_dir,
            });
            records.push(ZipRecord {
                flags,
                method,
                compressed_size: comp_size as u64,
                local_header_offset: lfh_off as u64,
            });
        }

        debug!(entries = entries.len(), "zip central directory read");
        Ok(Self {
            reader,
            source_len,
            entries,
            records,
            index,
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn open_record(&mut self, rec: ZipRecord) -> io::Result<ZipEntryReader<'_, R>> {
        if rec.flags & FLAG_ENCRYPTED != 0 {
            return Err(unsupported("encrypted entry"));
        }
        if rec.method != METHOD_STORED && rec.method != METHOD_DEFLATE {
            return Err(unsupported("compression method"));
        }

        self.reader.seek(SeekFrom::Start(rec.local_header_offset))?;
        let mut lfh = [0u8; LFH_LEN];
        read_exact_n(&mut self.reader, &mut lfh)?;
        if le_u32(&lfh[0..4]) != SIG_LFH {
            return Err(malformed("bad local header signature"));
        }

        let name_len = le_u16(&lfh[26..28]) as u64;
        let extra_len = le_u16(&lfh[28..30]) as u64;
        let data_start = rec
            .local_header_offset
            .saturating_add(LFH_LEN as u64)
            .saturating_add(name_len)
            .saturating_add(extra_len);
        let data_end = data_start.saturating_add(rec.compressed_size);
        if data_start > self.source_len || data_end > self.source_len {
            return Err(malformed("entry data out of bounds"));
        }

        self.reader.seek(SeekFrom::Start(data_start))?;
        let take = LimitedRead::new(&mut self.reader, rec.compressed_size);
        Ok(match rec.method {
            METHOD_STORED => ZipEntryReader::Stored(take),
            _ => ZipEntryReader::Deflate(DeflateDecoder::new(take)),
        })
    }
}

impl<R: Read + Seek> SeekableArchive for ZipArchive<R> {
    fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    fn entry(&self, path: &str) -> Option<&EntryInfo> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    fn open(&mut self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        let Some(&idx) = self.index.get(path) else {
            return Ok(None);
        };
        let rec = self.records[idx];
        let reader = self.open_record(rec)?;
        Ok(Some(Box::new(reader)))
    }
}

/// Decompressed reader for one ZIP entry.
pub enum ZipEntryReader<'a, R> {
    Stored(LimitedRead<'a, R>),
    Deflate(DeflateDecoder<LimitedRead<'a, R>>),
}

impl<R: Read> Read for ZipEntryReader<'_, R> {
    #[inline]
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match self {
            ZipEntryReader::Stored(r) => r.read(dst),
            ZipEntryReader::Deflate(r) => r.read(dst),
        }
    }
}

/// Read wrapper that limits reads to a fixed number of bytes.
///
/// This is used to bound entry payload reads to the compressed size.
pub struct LimitedRead<'a, R: ?Sized> {
    inner: &'a mut R,
    remaining: u64,
}

impl<'a, R: ?Sized + Read> LimitedRead<'a, R> {
    #[inline]
    pub fn new(inner: &'a mut R, remaining: u64) -> Self {
        Self { inner, remaining }
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: ?Sized + Read> Read for LimitedRead<'_, R> {
    #[inline]
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = self.remaining.min(dst.len() as u64) as usize;
        let n = self.inner.read(&mut dst[..max])?;
        if n == 0 && max > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zip entry truncated",
            ));
        }
        self.remaining = self.remaining.saturating_sub(n as u64);
        Ok(n)
    }
}

/// Scan backward for an EOCD signature whose comment fits in the window.
///
/// A signature-shaped byte run inside the comment is a false positive when
/// its own comment length overruns the window; earlier candidates are tried.
fn find_eocd(win: &[u8]) -> Option<usize> {
    if win.len() < EOCD_MIN_LEN {
        return None;
    }
    (0..=win.len() - EOCD_MIN_LEN).rev().find(|&i| {
        le_u32(&win[i..i + 4]) == SIG_EOCD
            && i + EOCD_MIN_LEN + le_u16(&win[i + 20..i + 22]) as usize <= win.len()
    })
}

fn malformed(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed zip: {what}"))
}

fn unsupported(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("unsupported zip feature: {what}"))
}

#[inline(always)]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline(always)]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_exact_n<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> io::Result<()> {
    let mut off = 0;
    while off < dst.len() {
        let n = match r.read(&mut dst[off..]) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zip truncated",
            ));
        }
        off += n;
    }
    Ok(())
}
