#![no_main]

use libfuzzer_sys::fuzz_target;

use pkg_manifest::manifest::{ManifestDecoder, ManifestSections, MAX_ENCODED_LINE_LEN};

// Decodes arbitrary bytes with a small line buffer. Whatever decodes must
// re-encode within the line limit and decode back to the same manifest.
// The raw section splitter must accept the same input without panicking.
fuzz_target!(|data: &[u8]| {
    let _ = ManifestSections::parse(data);

    let decoder = ManifestDecoder::new()
        .with_max_line_len(128)
        .with_scan_buffer_len(16);
    let Ok(manifest) = decoder.decode_slice(data) else {
        return;
    };
    let Ok(encoded) = manifest.to_bytes() else {
        // Decoded values may carry a bare CR, which the encoder refuses.
        return;
    };
    for line in encoded.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        assert!(line.len() <= MAX_ENCODED_LINE_LEN);
    }
    let again = ManifestDecoder::new()
        .decode_slice(&encoded)
        .expect("encoder output decodes");
    assert_eq!(again, manifest);
});
