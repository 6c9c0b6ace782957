//! Container formats behind the archive collaborator traits.
//!
//! # Design Notes
//! - Zip is random-access (`SeekableArchive`); tar is sequential
//!   (`EntryStream`).

pub mod tar;
pub mod zip;

pub use tar::{is_ustar_header, TarEntryStream};
pub use zip::{is_zip_magic, ZipArchive, ZipEntryReader};
