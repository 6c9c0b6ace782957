//! Sequential reads of signed tar archives.

use std::io::{Cursor, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use pkg_manifest::archive::EntryStream;
use pkg_manifest::verify::{EntryState, GlobalState};
use pkg_manifest::{
    ArchiveError, ArchiveStream, IntegrityError, MetadataResolver, ReaderConfig, TarEntryStream,
};

use crate::support::{self, SIGNER};

const PAYLOAD: &[(&str, &[u8])] = &[
    ("bin/tool", b"#!/bin/sh\necho hi\n"),
    ("share/doc/README", b"read me\n"),
];

/// Path, content, and signer names of every file entry.
fn read_all<S: EntryStream>(
    stream: &mut ArchiveStream<S>,
) -> Result<Vec<(String, Vec<u8>, Vec<String>)>, ArchiveError> {
    let mut out = Vec::new();
    loop {
        let (path, data) = {
            let Some(mut entry) = stream.next_entry()? else {
                break;
            };
            if entry.info().is_dir {
                continue;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            (entry.path().to_string(), data)
        };
        let signers = stream
            .signers(&path)
            .unwrap_or_default()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        out.push((path, data, signers));
    }
    Ok(out)
}

fn open(members: &[support::Member]) -> ArchiveStream<TarEntryStream<Cursor<Vec<u8>>>> {
    let tar = TarEntryStream::new(Cursor::new(support::tar_bytes(members)));
    ArchiveStream::open(tar, ReaderConfig::default()).unwrap()
}

#[test]
fn signed_tar_verifies_in_stream_order() {
    let mut stream = open(&support::signed_members(PAYLOAD));
    assert!(stream.manifest().is_some());

    let entries = read_all(&mut stream).unwrap();
    let paths: Vec<&str> = entries.iter().map(|(p, _, _)| p.as_str()).collect();
    // The manifest is consumed by the bootstrap; signing files are replayed.
    assert_eq!(
        paths,
        ["META-INF/CERT.SF", "META-INF/CERT.RSA", "bin/tool", "share/doc/README"]
    );
    for (path, data, signers) in &entries[2..] {
        let expected = PAYLOAD.iter().find(|(p, _)| p == path).unwrap().1;
        assert_eq!(data.as_slice(), expected);
        assert_eq!(signers, &[SIGNER.to_string()]);
        assert_eq!(stream.entry_state(path), EntryState::Verified);
    }
    assert_eq!(stream.verification_state(), GlobalState::Active);
}

#[test]
fn entries_carry_their_manifest_attributes() {
    let mut stream = open(&support::signed_members(PAYLOAD));
    loop {
        let entry = stream.next_entry().unwrap().expect("payload entry");
        if entry.path() == "bin/tool" {
            let digest = entry.attributes().unwrap().get("SHA-256-Digest").unwrap();
            assert_eq!(digest, support::b64_sha256(PAYLOAD[0].1));
            break;
        }
    }
}

#[test]
fn tampered_tar_entry_fails() {
    let mut members = support::signed_members(PAYLOAD);
    support::tamper(&mut members, "share/doc/README", b"read you\n");
    let mut stream = open(&members);

    let err = read_all(&mut stream).unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Integrity(IntegrityError::EntryDigestMismatch { ref path, .. })
            if path == "share/doc/README"
    ));
    assert_eq!(stream.entry_state("bin/tool"), EntryState::Verified);
    assert_eq!(stream.entry_state("share/doc/README"), EntryState::Failed);
}

#[test]
fn manifest_after_first_entry_is_ignored() {
    let manifest = support::manifest_for(PAYLOAD);
    let members = vec![
        support::file("bin/tool", b"tampered but unverified"),
        support::file("META-INF/MANIFEST.MF", &manifest),
    ];
    let mut stream = open(&members);
    assert!(stream.resolve().unwrap().is_none());

    let entries = read_all(&mut stream).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].0, "META-INF/MANIFEST.MF");
    assert_eq!(stream.verification_state(), GlobalState::Unverified);
}

#[test]
fn gzip_compressed_tar_streams_through_flate2() {
    let tar = support::tar_bytes(&support::signed_members(PAYLOAD));
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&tar).unwrap();
    let gz = gz.finish().unwrap();

    let input = TarEntryStream::new(GzDecoder::new(Cursor::new(gz)));
    let mut stream = ArchiveStream::open(input, ReaderConfig::default()).unwrap();
    let entries = read_all(&mut stream).unwrap();
    assert!(entries.iter().skip(2).all(|(_, _, signers)| signers == &[SIGNER]));
}

#[test]
fn disabled_verification_streams_meta_entries_unbuffered() {
    let mut members = support::signed_members(PAYLOAD);
    support::tamper(&mut members, "bin/tool", b"changed");
    let tar = TarEntryStream::new(Cursor::new(support::tar_bytes(&members)));
    let mut stream =
        ArchiveStream::open(tar, ReaderConfig::default().without_verification()).unwrap();

    let entries = read_all(&mut stream).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[2].1, b"changed");
    assert!(entries.iter().all(|(_, _, signers)| signers.is_empty()));
}

#[test]
fn truncated_manifest_fails_open() {
    let members = vec![
        support::file("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nCreated-By: x"),
        support::file("a", b"a"),
    ];
    let tar = TarEntryStream::new(Cursor::new(support::tar_bytes(&members)));
    assert!(matches!(
        ArchiveStream::open(tar, ReaderConfig::default()),
        Err(ArchiveError::Format(_))
    ));
}
