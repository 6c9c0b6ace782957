//! Random-access reads of signed zip archives.

use std::io::{Cursor, Read};

use pkg_manifest::manifest::ManifestSections;
use pkg_manifest::verify::{EntryState, GlobalState};
use pkg_manifest::{ArchiveError, ArchiveFile, IntegrityError, ReaderConfig, ZipArchive};

use crate::support::{self, SIGNER};

const PAYLOAD: &[(&str, &[u8])] = &[
    ("com/example/App.class", b"\xca\xfe\xba\xbe app"),
    ("com/example/res.txt", b"resource contents\n"),
];

fn open(members: &[support::Member]) -> ArchiveFile<ZipArchive<Cursor<Vec<u8>>>> {
    let zip = ZipArchive::new(Cursor::new(support::zip_bytes(members))).unwrap();
    ArchiveFile::open(zip, ReaderConfig::default()).unwrap()
}

#[test]
fn signed_jar_verifies_every_entry() {
    let mut file = open(&support::signed_members(PAYLOAD));

    let manifest = file.manifest().unwrap().expect("manifest present");
    assert_eq!(
        manifest.main_attributes().get("created-by"),
        Some("pkg-manifest tests")
    );
    assert_eq!(manifest.entry_count(), 2);

    for (path, data) in PAYLOAD {
        assert_eq!(file.read_entry(path).unwrap().unwrap(), *data);
        assert_eq!(file.entry_state(path), EntryState::Verified);
        let signers = file.signers(path).expect("entry is signed");
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].name, SIGNER);
    }
    assert_eq!(file.verification_state(), GlobalState::Active);
}

#[test]
fn tampered_entry_fails_without_affecting_others() {
    let mut members = support::signed_members(PAYLOAD);
    support::tamper(&mut members, "com/example/App.class", b"evil");
    let mut file = open(&members);

    let err = file.read_entry("com/example/App.class").unwrap_err();
    match err {
        ArchiveError::Integrity(IntegrityError::EntryDigestMismatch { path, algorithm }) => {
            assert_eq!(path, "com/example/App.class");
            assert_eq!(algorithm, "SHA-256");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(file.entry_state("com/example/App.class"), EntryState::Failed);
    assert!(file.signers("com/example/App.class").is_none());

    assert_eq!(
        file.read_entry("com/example/res.txt").unwrap().unwrap(),
        b"resource contents\n"
    );
    assert!(file.signers("com/example/res.txt").is_some());
}

#[test]
fn failure_surfaces_on_the_read_that_finishes_the_entry() {
    let mut members = support::signed_members(PAYLOAD);
    support::tamper(&mut members, "com/example/res.txt", b"resource contentz\n");
    let mut file = open(&members);

    let mut entry = file.open_entry("com/example/res.txt").unwrap().unwrap();
    assert!(entry.is_verifying());
    let mut head = [0u8; 4];
    entry.read_exact(&mut head).unwrap();
    assert_eq!(entry.state(), Some(EntryState::Verifying));

    let mut rest = Vec::new();
    let err = entry.read_to_end(&mut rest).unwrap_err();
    assert!(matches!(
        ArchiveError::from(err),
        ArchiveError::Integrity(IntegrityError::EntryDigestMismatch { .. })
    ));
    // Sticky for the same reader.
    let mut more = [0u8; 1];
    assert!(entry.read(&mut more).is_err());
}

#[test]
fn unsigned_jar_reads_unverified() {
    let manifest = support::manifest_for(PAYLOAD);
    let mut members = support::with_meta(&manifest, None, PAYLOAD);
    support::tamper(&mut members, "com/example/App.class", b"not what the manifest says");
    let mut file = open(&members);

    assert!(file.manifest().unwrap().is_some());
    assert_eq!(
        file.read_entry("com/example/App.class").unwrap().unwrap(),
        b"not what the manifest says"
    );
    assert_eq!(file.verification_state(), GlobalState::Unverified);
    assert!(file.signers("com/example/App.class").is_none());
}

#[test]
fn archive_without_manifest_is_not_an_error() {
    let members = vec![support::file("a.txt", b"plain")];
    let mut file = open(&members);
    assert!(file.manifest().unwrap().is_none());
    assert_eq!(file.read_entry("a.txt").unwrap().unwrap(), b"plain");
    assert!(file.read_entry("b.txt").unwrap().is_none());
}

#[test]
fn section_digests_sign_entries_when_manifest_digest_is_stale() {
    let manifest = support::manifest_for(PAYLOAD);
    let sections = ManifestSections::parse(&manifest);
    let app: Vec<u8> = sections
        .entry("com/example/App.class")
        .unwrap()
        .flatten()
        .copied()
        .collect();
    let sf = support::per_section_sf(sections.main(), &[("com/example/App.class", &app)]);
    let mut file = open(&support::with_meta(&manifest, Some(&sf), PAYLOAD));

    file.read_entry("com/example/App.class").unwrap();
    file.read_entry("com/example/res.txt").unwrap();
    assert!(file.signers("com/example/App.class").is_some());
    // Digest-checked, but not covered by the signature file.
    assert_eq!(file.entry_state("com/example/res.txt"), EntryState::Verified);
    assert!(file.signers("com/example/res.txt").is_none());
}

#[test]
fn entry_missing_from_signature_file_is_unsigned() {
    let manifest = support::manifest_for(PAYLOAD);
    let sf = support::whole_manifest_sf_for(&manifest, &["com/example/App.class"]);
    let mut file = open(&support::with_meta(&manifest, Some(&sf), PAYLOAD));

    for (path, data) in PAYLOAD {
        assert_eq!(file.read_entry(path).unwrap().unwrap(), *data);
        assert_eq!(file.entry_state(path), EntryState::Verified);
    }
    let signers = file.signers("com/example/App.class").expect("listed entry is signed");
    assert_eq!(signers[0].name, SIGNER);
    assert!(file.signers("com/example/res.txt").is_none());
}

#[test]
fn edited_manifest_section_poisons_the_archive() {
    let manifest = support::manifest_for(PAYLOAD);
    let sections = ManifestSections::parse(&manifest);
    let app: Vec<u8> = sections
        .entry("com/example/App.class")
        .unwrap()
        .flatten()
        .copied()
        .collect();
    let sf = support::per_section_sf(sections.main(), &[("com/example/App.class", &app)]);

    // Same digests, extra attribute: the section no longer matches.
    let edited = String::from_utf8(manifest.clone())
        .unwrap()
        .replace(
            "Name: com/example/App.class\r\n",
            "Name: com/example/App.class\r\nX-Injected: yes\r\n",
        )
        .into_bytes();
    let mut file = open(&support::with_meta(&edited, Some(&sf), PAYLOAD));

    for _ in 0..2 {
        match file.read_entry("com/example/res.txt") {
            Err(ArchiveError::Integrity(IntegrityError::SectionDigestMismatch { path, .. })) => {
                assert_eq!(path, "com/example/App.class");
            }
            other => panic!("expected section digest mismatch, got {:?}", other.map(|_| ())),
        }
    }
}

#[test]
fn manifest_lookup_ignores_case_as_a_fallback() {
    let manifest = support::manifest_for(PAYLOAD);
    let mut members = vec![support::file("meta-inf/Manifest.mf", &manifest)];
    members.extend(PAYLOAD.iter().map(|(p, d)| support::file(p, d)));
    let mut file = open(&members);
    assert_eq!(file.manifest().unwrap().unwrap().entry_count(), 2);
}

#[test]
fn zip_on_disk_round_trips_through_open_path() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.jar");
    std::fs::write(&path, support::zip_bytes(&support::signed_members(PAYLOAD))).unwrap();

    let mut file = ArchiveFile::open(ZipArchive::open_path(&path).unwrap(), ReaderConfig::default())
        .unwrap();
    let paths: Vec<String> = file.entries().iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths[0], "META-INF/");
    for path in paths.iter().filter(|p| !p.ends_with('/')) {
        file.read_entry(path).unwrap();
    }
    assert!(file.signers("com/example/res.txt").is_some());
    let _zip = file.close();
}
