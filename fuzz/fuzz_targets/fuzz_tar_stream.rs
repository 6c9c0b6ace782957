#![no_main]

use std::io::{Cursor, Read};

use libfuzzer_sys::fuzz_target;

use pkg_manifest::{ArchiveStream, ReaderConfig, TarEntryStream};

// Streams arbitrary bytes as a tar archive through the verifying reader.
// Every outcome is allowed except a panic or an unbounded loop.
fuzz_target!(|data: &[u8]| {
    let config = ReaderConfig {
        max_manifest_bytes: 64 * 1024,
        max_meta_entry_bytes: 64 * 1024,
        ..ReaderConfig::default()
    };
    let tar = TarEntryStream::new(Cursor::new(data));
    let Ok(mut stream) = ArchiveStream::open(tar, config) else {
        return;
    };
    let mut buf = [0u8; 256];
    for _ in 0..1024 {
        let Ok(Some(mut entry)) = stream.next_entry() else {
            return;
        };
        while let Ok(n) = entry.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
});
