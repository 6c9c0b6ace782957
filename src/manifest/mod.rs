//! Manifest support: the buffered line scanner, attribute blocks, the
//! manifest codec, and raw section splitting.
//!
//! # Design Notes
//! - The codec depends only on `std::io::Read`/`Write`; archive access and
//!   verification live in `archive`, `reader`, and `verify`.
//! - Decoding is bounded by a fixed line buffer (`ManifestDecoder`); a line
//!   that does not terminate within it is rejected rather than grown.

pub mod attributes;
pub mod codec;
pub mod line_scanner;
pub mod sections;

pub use attributes::{names, AttributeName, Attributes, InvalidAttributeName, MAX_NAME_LEN};
pub use codec::{
    make_72_safe, Manifest, ManifestDecoder, DEFAULT_MAX_LINE_LEN, MAX_ENCODED_LINE_LEN,
};
pub use line_scanner::{LineScanner, DEFAULT_SCAN_BUFFER_LEN};
pub use sections::ManifestSections;
