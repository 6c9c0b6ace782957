//! Raw section boundaries of manifest bytes.
//!
//! Signature files record digests over the exact bytes of the manifest and of
//! each of its sections, so verification needs byte ranges into the original
//! input rather than a re-encoded copy.
//!
//! # Layout
//! - The main section runs from offset 0 through the first blank line.
//! - Each later section runs from its `Name:` line through the blank line
//!   that ends it (or end of input). Extra blank lines between sections
//!   belong to no section.
//! - A name that appears in several sections maps to all of their ranges,
//!   in input order.
//!
//! Splitting is lenient: it runs on bytes that already decoded cleanly and
//! skips any section whose first line is not a `Name:` header.

use std::ops::Range;

use ahash::AHashMap;

pub struct ManifestSections<'a> {
    raw: &'a [u8],
    main: Range<usize>,
    entries: AHashMap<String, Vec<Range<usize>>>,
}

/// One physical line: `[start, end)` includes the terminator; `content_len`
/// excludes it.
struct RawLine {
    start: usize,
    end: usize,
    content_len: usize,
}

fn raw_lines(raw: &[u8]) -> impl Iterator<Item = RawLine> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= raw.len() {
            return None;
        }
        let start = pos;
        let end = match memchr::memchr(b'\n', &raw[start..]) {
            Some(i) => start + i + 1,
            None => raw.len(),
        };
        pos = end;
        let mut content_end = end;
        if content_end > start && raw[content_end - 1] == b'\n' {
            content_end -= 1;
        }
        if content_end > start && raw[content_end - 1] == b'\r' {
            content_end -= 1;
        }
        Some(RawLine {
            start,
            end,
            content_len: content_end - start,
        })
    })
}

impl<'a> ManifestSections<'a> {
    pub fn parse(raw: &'a [u8]) -> Self {
        let mut lines = raw_lines(raw);

        let mut main_end = 0;
        for line in lines.by_ref() {
            main_end = line.end;
            if line.content_len == 0 {
                break;
            }
        }

        let mut entries: AHashMap<String, Vec<Range<usize>>> = AHashMap::new();
        while let Some(first) = lines.next() {
            if first.content_len == 0 {
                continue;
            }
            let head = &raw[first.start..first.start + first.content_len];
            let is_named = head.len() >= 6
                && head[..4].eq_ignore_ascii_case(b"name")
                && &head[4..6] == b": ";
            let mut name = if is_named { head[6..].to_vec() } else { Vec::new() };

            let mut end = first.end;
            let mut in_name = true;
            while let Some(line) = lines.next() {
                end = line.end;
                if line.content_len == 0 {
                    break;
                }
                let body = &raw[line.start..line.start + line.content_len];
                if in_name && body[0] == b' ' {
                    name.extend_from_slice(&body[1..]);
                } else {
                    in_name = false;
                }
            }

            if !is_named {
                continue;
            }
            let name = String::from_utf8_lossy(&name).into_owned();
            entries.entry(name).or_default().push(first.start..end);
        }

        Self {
            raw,
            main: 0..main_end,
            entries,
        }
    }

    /// Bytes of the main section, terminating blank line included.
    pub fn main(&self) -> &'a [u8] {
        &self.raw[self.main.clone()]
    }

    /// Every raw section recorded for `name`.
    pub fn entry(&self, name: &str) -> Option<impl Iterator<Item = &'a [u8]> + '_> {
        let raw = self.raw;
        self.entries
            .get(name)
            .map(move |ranges| ranges.iter().map(move |r| &raw[r.clone()]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
