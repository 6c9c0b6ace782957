//! Verification behavior shared by both reader modes, and the CLI.

use std::io::{Cursor, Read};
use std::process::Command;

use pkg_manifest::verify::{DigestVerifierFactory, GlobalState, VerifyPolicy};
use pkg_manifest::{
    ArchiveError, ArchiveFile, ArchiveStream, IntegrityError, MemArchive, MetadataResolver,
    ReaderConfig, TarEntryStream, ZipArchive,
};

use crate::support;

const PAYLOAD: &[(&str, &[u8])] = &[("a.txt", b"alpha"), ("b/c.txt", b"gamma")];

fn mem(members: &[support::Member]) -> MemArchive {
    let mut archive = MemArchive::new();
    for (path, data) in members {
        match data {
            Some(data) => archive.push_file(path.as_str(), data.clone()),
            None => archive.push_dir(path.as_str()),
        }
    }
    archive
}

fn signed_paths_random(archive: MemArchive, policy: VerifyPolicy) -> Vec<String> {
    let mut file = ArchiveFile::with_verifier(
        archive,
        ReaderConfig::default(),
        DigestVerifierFactory::new(policy),
    )
    .unwrap();
    let mut signed = Vec::new();
    for (path, _) in PAYLOAD {
        file.read_entry(path).unwrap();
        if file.signers(path).is_some() {
            signed.push(path.to_string());
        }
    }
    signed
}

fn signed_paths_sequential(archive: MemArchive, policy: VerifyPolicy) -> Vec<String> {
    let mut stream = ArchiveStream::with_verifier(
        archive.into_stream(),
        ReaderConfig::default(),
        DigestVerifierFactory::new(policy),
    )
    .unwrap();
    let mut signed = Vec::new();
    loop {
        let path = {
            let Some(mut entry) = stream.next_entry().unwrap() else {
                break;
            };
            std::io::copy(&mut entry, &mut std::io::sink()).unwrap();
            entry.path().to_string()
        };
        if stream.signers(&path).is_some() {
            signed.push(path);
        }
    }
    signed
}

#[test]
fn both_modes_agree_on_signed_entries() {
    let members = support::signed_members(PAYLOAD);
    let random = signed_paths_random(mem(&members), VerifyPolicy::SignedOnly);
    let sequential = signed_paths_sequential(mem(&members), VerifyPolicy::SignedOnly);
    assert_eq!(random, ["a.txt", "b/c.txt"]);
    assert_eq!(random, sequential);
}

#[test]
fn both_modes_resolve_the_same_manifest() {
    let members = support::signed_members(PAYLOAD);
    let mut file = ArchiveFile::open(mem(&members), ReaderConfig::default()).unwrap();
    let mut stream =
        ArchiveStream::open(mem(&members).into_stream(), ReaderConfig::default()).unwrap();

    let resolvers: [&mut dyn MetadataResolver; 2] = [&mut file, &mut stream];
    let manifests: Vec<_> = resolvers
        .into_iter()
        .map(|r| {
            let attrs = r.attributes_for("b/c.txt").unwrap().unwrap();
            (r.resolve().unwrap().unwrap(), attrs)
        })
        .collect();
    assert_eq!(*manifests[0].0, *manifests[1].0);
    assert_eq!(manifests[0].1, manifests[1].1);
}

#[test]
fn signature_file_without_block_is_unsigned() {
    let manifest = support::manifest_for(PAYLOAD);
    let sf = support::whole_manifest_sf(&manifest);
    let mut members = support::with_meta(&manifest, None, PAYLOAD);
    members.insert(2, support::file("META-INF/CERT.SF", &sf));

    let mut file = ArchiveFile::open(mem(&members), ReaderConfig::default()).unwrap();
    file.read_entry("a.txt").unwrap();
    assert_eq!(file.verification_state(), GlobalState::Unverified);
}

#[test]
fn all_digests_policy_catches_tampering_in_unsigned_archives() {
    let manifest = support::manifest_for(PAYLOAD);
    let mut members = support::with_meta(&manifest, None, PAYLOAD);
    support::tamper(&mut members, "b/c.txt", b"delta");

    let mut file = ArchiveFile::with_verifier(
        mem(&members),
        ReaderConfig::default(),
        DigestVerifierFactory::new(VerifyPolicy::AllDigests),
    )
    .unwrap();
    file.read_entry("a.txt").unwrap();
    assert!(file.signers("a.txt").is_none());
    assert!(matches!(
        file.read_entry("b/c.txt"),
        Err(ArchiveError::Integrity(IntegrityError::EntryDigestMismatch { .. }))
    ));

    // Same archive, default policy: nothing to verify.
    assert!(signed_paths_sequential(mem(&members), VerifyPolicy::SignedOnly).is_empty());
}

#[test]
fn oversized_metadata_entry_is_rejected() {
    let mut members = support::signed_members(PAYLOAD);
    members.insert(2, support::file("META-INF/big.bin", &vec![0u8; 4096]));
    let config = ReaderConfig {
        max_manifest_bytes: 1024,
        max_meta_entry_bytes: 2048,
        ..ReaderConfig::default()
    };

    let mut file = ArchiveFile::open(mem(&members), config.clone()).unwrap();
    assert!(matches!(
        file.read_entry("a.txt"),
        Err(ArchiveError::MetaEntryTooLarge { limit: 2048, .. })
    ));

    let tar = TarEntryStream::new(Cursor::new(support::tar_bytes(&members)));
    let mut stream = ArchiveStream::open(tar, config).unwrap();
    assert!(matches!(
        stream.next_entry(),
        Err(ArchiveError::MetaEntryTooLarge { .. })
    ));
}

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pkg-manifest"))
}

#[test]
fn cli_verify_reports_status_and_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let good = tmp.path().join("good.jar");
    std::fs::write(&good, support::zip_bytes(&support::signed_members(PAYLOAD))).unwrap();

    let output = cli().arg("verify").arg(&good).output().unwrap();
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a.txt verified CERT"), "stdout={stdout}");

    let mut members = support::signed_members(PAYLOAD);
    support::tamper(&mut members, "a.txt", b"omega");
    let bad = tmp.path().join("bad.tar");
    std::fs::write(&bad, support::tar_bytes(&members)).unwrap();
    let output = cli().arg("verify").arg(&bad).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn cli_show_prints_the_canonical_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let jar = tmp.path().join("app.jar");
    std::fs::write(&jar, support::zip_bytes(&support::signed_members(PAYLOAD))).unwrap();

    let output = cli().arg("show").arg(&jar).output().unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout, support::manifest_for(PAYLOAD));

    let not_archive = tmp.path().join("notes.txt");
    std::fs::write(&not_archive, b"hello").unwrap();
    let output = cli().arg("verify").arg(&not_archive).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn zip_and_mem_archives_expose_identical_content() {
    let members = support::signed_members(PAYLOAD);
    let zip = ZipArchive::new(Cursor::new(support::zip_bytes(&members))).unwrap();
    let mut from_zip = ArchiveFile::open(zip, ReaderConfig::default()).unwrap();
    let mut from_mem = ArchiveFile::open(mem(&members), ReaderConfig::default()).unwrap();
    for (path, _) in PAYLOAD {
        let mut a = Vec::new();
        from_zip
            .open_entry(path)
            .unwrap()
            .unwrap()
            .read_to_end(&mut a)
            .unwrap();
        assert_eq!(Some(a), from_mem.read_entry(path).unwrap());
    }
}
