//! Signed-archive fixtures shared by the integration tests.
//!
//! Archives are signed the way jar tooling does it: the manifest records a
//! SHA-256 digest per entry, `META-INF/CERT.SF` digests the manifest and
//! lists every section it signs, and `META-INF/CERT.RSA` stands in for the
//! signature block.

use std::io::{Cursor, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pkg_manifest::manifest::ManifestSections;
use sha2::{Digest, Sha256};

pub const SIGNER: &str = "CERT";

pub fn b64_sha256(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Archive member; a `None` payload is a directory.
pub type Member = (String, Option<Vec<u8>>);

pub fn file(path: &str, data: &[u8]) -> Member {
    (path.to_string(), Some(data.to_vec()))
}

pub fn dir(path: &str) -> Member {
    (path.to_string(), None)
}

pub fn manifest_for(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = String::from("Manifest-Version: 1.0\r\nCreated-By: pkg-manifest tests\r\n\r\n");
    for (path, data) in entries {
        out.push_str(&format!(
            "Name: {path}\r\nSHA-256-Digest: {}\r\n\r\n",
            b64_sha256(data)
        ));
    }
    out.into_bytes()
}

/// `Name:` paths of a fixture manifest (fixture paths never wrap).
pub fn manifest_paths(manifest: &[u8]) -> Vec<String> {
    std::str::from_utf8(manifest)
        .unwrap()
        .split("\r\n")
        .filter_map(|line| line.strip_prefix("Name: "))
        .map(str::to_string)
        .collect()
}

/// Signature file digesting the whole manifest and listing every section.
pub fn whole_manifest_sf(manifest: &[u8]) -> Vec<u8> {
    let paths = manifest_paths(manifest);
    let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
    whole_manifest_sf_for(manifest, &paths)
}

/// Signature file digesting the whole manifest but listing only `paths`.
pub fn whole_manifest_sf_for(manifest: &[u8], paths: &[&str]) -> Vec<u8> {
    let sections = ManifestSections::parse(manifest);
    let mut out = format!(
        "Signature-Version: 1.0\r\nSHA-256-Digest-Manifest: {}\r\n\r\n",
        b64_sha256(manifest)
    );
    for path in paths {
        let raw: Vec<u8> = sections
            .entry(path)
            .expect("path has a manifest section")
            .flatten()
            .copied()
            .collect();
        out.push_str(&format!("Name: {path}\r\nSHA-256-Digest: {}\r\n\r\n", b64_sha256(&raw)));
    }
    out.into_bytes()
}

/// Signature file with a stale whole-manifest digest and per-section
/// digests for `sections` (`(path, raw section bytes)`).
pub fn per_section_sf(main_section: &[u8], sections: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = format!(
        "Signature-Version: 1.0\r\nSHA-256-Digest-Manifest: {}\r\n\
SHA-256-Digest-Manifest-Main-Attributes: {}\r\n\r\n",
        b64_sha256(b"stale"),
        b64_sha256(main_section),
    );
    for (path, raw) in sections {
        out.push_str(&format!("Name: {path}\r\nSHA-256-Digest: {}\r\n\r\n", b64_sha256(raw)));
    }
    out.into_bytes()
}

/// Members of a jar whose manifest covers `payload` as given.
pub fn signed_members(payload: &[(&str, &[u8])]) -> Vec<Member> {
    let manifest = manifest_for(payload);
    let sf = whole_manifest_sf(&manifest);
    with_meta(&manifest, Some(&sf), payload)
}

pub fn with_meta(manifest: &[u8], sf: Option<&[u8]>, payload: &[(&str, &[u8])]) -> Vec<Member> {
    let mut members = vec![dir("META-INF/"), file("META-INF/MANIFEST.MF", manifest)];
    if let Some(sf) = sf {
        members.push(file(&format!("META-INF/{SIGNER}.SF"), sf));
        members.push(file(&format!("META-INF/{SIGNER}.RSA"), b"opaque signature block"));
    }
    members.extend(payload.iter().map(|(p, d)| file(p, d)));
    members
}

/// Replace the payload of `path`.
pub fn tamper(members: &mut [Member], path: &str, data: &[u8]) {
    for (p, d) in members.iter_mut() {
        if p == path {
            *d = Some(data.to_vec());
        }
    }
}

pub fn zip_bytes(members: &[Member]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut zw = zip::ZipWriter::new(&mut out);
        for (path, data) in members {
            match data {
                None => zw
                    .add_directory(path.as_str(), zip::write::FileOptions::default())
                    .unwrap(),
                Some(data) => {
                    let opts = zip::write::FileOptions::default()
                        .compression_method(zip::CompressionMethod::Deflated);
                    zw.start_file(path.as_str(), opts).unwrap();
                    zw.write_all(data).unwrap();
                }
            }
        }
        zw.finish().unwrap();
    }
    out.into_inner()
}

const TAR_BLOCK_LEN: usize = 512;

fn tar_header(name: &str, size: usize, typeflag: u8) -> [u8; TAR_BLOCK_LEN] {
    assert!(name.len() <= 100, "fixture names must fit the ustar name field");
    let mut buf = [0u8; TAR_BLOCK_LEN];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf[100..108].copy_from_slice(b"0000644\0");
    buf[108..116].copy_from_slice(b"0000000\0");
    buf[116..124].copy_from_slice(b"0000000\0");
    buf[124..136].copy_from_slice(format!("{size:011o}\0").as_bytes());
    buf[136..148].copy_from_slice(b"00000000000\0");
    buf[148..156].fill(b' ');
    buf[156] = typeflag;
    buf[257..263].copy_from_slice(b"ustar\0");
    buf[263..265].copy_from_slice(b"00");
    let sum: u32 = buf.iter().map(|&b| b as u32).sum();
    buf[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
    buf
}

pub fn tar_bytes(members: &[Member]) -> Vec<u8> {
    let mut out = Vec::new();
    for (path, data) in members {
        match data {
            None => out.extend_from_slice(&tar_header(path, 0, b'5')),
            Some(data) => {
                out.extend_from_slice(&tar_header(path, data.len(), b'0'));
                out.extend_from_slice(data);
                let pad = (TAR_BLOCK_LEN - data.len() % TAR_BLOCK_LEN) % TAR_BLOCK_LEN;
                out.resize(out.len() + pad, 0);
            }
        }
    }
    out.resize(out.len() + 2 * TAR_BLOCK_LEN, 0);
    out
}
