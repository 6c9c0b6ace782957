//! Encode/decode properties of the manifest codec.
//!
//! Decoding the encoder's output must reproduce the manifest structurally,
//! no physical line may exceed 72 bytes, and wrapped values must come back
//! byte-for-byte.

use proptest::prelude::*;

use pkg_manifest::manifest::{AttributeName, MAX_ENCODED_LINE_LEN, MAX_NAME_LEN};
use pkg_manifest::{Attributes, Manifest};

fn name_strategy() -> impl Strategy<Value = AttributeName> {
    "[A-Za-z0-9_-]{1,70}"
        .prop_filter("reserved section header", |s| !s.eq_ignore_ascii_case("name"))
        .prop_filter_map("longer than an encodable name", |s| AttributeName::new(&s).ok())
}

fn value_strategy() -> impl Strategy<Value = String> {
    // Any non-control text, long enough to wrap several times.
    "\\PC{0,300}"
}

fn block_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::vec((name_strategy(), value_strategy()), 0..6).prop_map(|pairs| {
        let mut attrs = Attributes::new();
        for (name, value) in pairs {
            attrs.insert(name, value);
        }
        attrs
    })
}

fn manifest_strategy() -> impl Strategy<Value = Manifest> {
    (
        block_strategy(),
        prop::collection::vec(("[ -~]{1,120}", block_strategy()), 0..6),
    )
        .prop_map(|(main, entries)| {
            let mut manifest = Manifest::new();
            manifest.main_attributes_mut().extend_from(&main);
            for (path, attrs) in entries {
                manifest.insert_entry(path, attrs);
            }
            manifest
        })
}

fn physical_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn decode_inverts_encode(manifest in manifest_strategy()) {
        let bytes = manifest.to_bytes().unwrap();
        let decoded = Manifest::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, manifest);
    }

    #[test]
    fn encoded_lines_fit_in_72_bytes(manifest in manifest_strategy()) {
        let bytes = manifest.to_bytes().unwrap();
        for line in physical_lines(&bytes) {
            prop_assert!(line.len() <= MAX_ENCODED_LINE_LEN, "line of {} bytes", line.len());
        }
    }

    #[test]
    fn wrapped_values_come_back_verbatim(value in "[ -~]{0,600}") {
        let mut manifest = Manifest::new();
        manifest.main_attributes_mut().put("Manifest-Version", "1.0").unwrap();
        manifest.entry_or_insert("x").put("Long-Value", value.clone()).unwrap();

        let bytes = manifest.to_bytes().unwrap();
        let decoded = Manifest::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded.entry("x").unwrap().get("long-value"), Some(value.as_str()));
    }

    #[test]
    fn lookups_ignore_key_case(name in name_strategy(), value in value_strategy()) {
        let mut attrs = Attributes::new();
        attrs.insert(name.clone(), value.clone());
        prop_assert_eq!(attrs.get(&name.as_str().to_ascii_uppercase()), Some(value.as_str()));
        prop_assert_eq!(attrs.get(&name.as_str().to_ascii_lowercase()), Some(value.as_str()));
    }

    #[test]
    fn names_are_encodable_or_rejected(name in "[A-Za-z][A-Za-z0-9_-]{0,69}", value in "[ -~]{0,120}") {
        prop_assume!(!name.eq_ignore_ascii_case("name"));
        match AttributeName::new(&name) {
            Ok(valid) => {
                let mut manifest = Manifest::new();
                manifest.main_attributes_mut().insert(valid, value.clone());
                let bytes = manifest.to_bytes().unwrap();
                let decoded = Manifest::from_bytes(&bytes).unwrap();
                prop_assert_eq!(decoded.main_attributes().get(&name), Some(value.as_str()));
            }
            Err(_) => prop_assert!(name.len() > MAX_NAME_LEN),
        }
    }

    #[test]
    fn decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..1024)) {
        let _ = Manifest::from_bytes(&bytes);
    }
}

#[test]
fn three_hundred_byte_value_survives_wrapping() {
    let value = "v".repeat(300);
    let mut manifest = Manifest::new();
    manifest.entry_or_insert("big").put("Payload", value.clone()).unwrap();

    let bytes = manifest.to_bytes().unwrap();
    assert!(physical_lines(&bytes).count() > 5);
    let decoded = Manifest::from_bytes(&bytes).unwrap();
    let got = decoded.entry("big").unwrap().get("Payload").unwrap();
    assert_eq!(got.len(), 300);
    assert_eq!(got, value);
}

#[test]
fn truncated_final_line_is_a_format_error() {
    let err = Manifest::from_bytes(b"Manifest-Version: 1.0\r\nCreated-By: half").unwrap_err();
    assert!(matches!(
        err,
        pkg_manifest::ManifestError::Format(pkg_manifest::FormatError::TruncatedLine { line: 2 })
    ));
}

#[test]
fn longest_name_survives_the_first_wrap() {
    let name = "N".repeat(MAX_NAME_LEN);
    let long = "w".repeat(200);
    for value in ["", "v", long.as_str()] {
        let mut manifest = Manifest::new();
        manifest.main_attributes_mut().put(&name, value).unwrap();
        let bytes = manifest.to_bytes().unwrap();
        let decoded = Manifest::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.main_attributes().get(&name), Some(value));
    }
    assert!(AttributeName::new(&"N".repeat(MAX_NAME_LEN + 1)).is_err());
}

/// Manifest laid out the way the JDK 8 `jar` tool writes it: CRLF endings,
/// a break after byte 70 of each CRLF-terminated line, then one every 72.
const JAR_TOOL_MANIFEST: &str = concat!(
    "Manifest-Version: 1.0\r\n",
    "Created-By: 1.8.0_292 (Oracle Corporation)\r\n",
    "Class-Path: lib/commons-collections4-4.4.jar lib/commons-lang3-3.12.0.\r\n",
    " jar lib/slf4j-api-1.7.36.jar lib/jackson-databind-2.13.4.2.jar lib/ja\r\n",
    " ckson-core-2.13.4.jar\r\n",
    "Main-Class: org.example.reporting.Main\r\n",
    "\r\n",
    "Name: org/example/reporting/internal/generated/ReportTemplateRendererF\r\n",
    " actoryImpl$Builder.class\r\n",
    "SHA-256-Digest: LXEWQrcmsEQBYnyp+6wy9chTD7GQPMTbAiWHF5IaSIE=\r\n",
    "Content-Type: application/java-vm\r\n",
    "\r\n",
);

#[test]
fn jar_tool_layout_round_trips_byte_for_byte() {
    let manifest = Manifest::from_bytes(JAR_TOOL_MANIFEST.as_bytes()).unwrap();

    let main = manifest.main_attributes();
    assert_eq!(main.get("Manifest-Version"), Some("1.0"));
    assert_eq!(
        main.get("Class-Path"),
        Some(
            "lib/commons-collections4-4.4.jar lib/commons-lang3-3.12.0.jar \
             lib/slf4j-api-1.7.36.jar lib/jackson-databind-2.13.4.2.jar \
             lib/jackson-core-2.13.4.jar"
        )
    );
    assert_eq!(main.get("Main-Class"), Some("org.example.reporting.Main"));

    assert_eq!(manifest.entry_count(), 1);
    let entry = manifest
        .entry("org/example/reporting/internal/generated/ReportTemplateRendererFactoryImpl$Builder.class")
        .expect("wrapped entry name is joined");
    assert_eq!(
        entry.get("SHA-256-Digest"),
        Some("LXEWQrcmsEQBYnyp+6wy9chTD7GQPMTbAiWHF5IaSIE=")
    );
    assert_eq!(entry.get("content-type"), Some("application/java-vm"));

    let encoded = manifest.to_bytes().unwrap();
    assert_eq!(
        String::from_utf8(encoded).unwrap(),
        JAR_TOOL_MANIFEST,
        "re-encoding must reproduce the jar tool's bytes"
    );
}
