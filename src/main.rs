//! Package manifest CLI
//!
//! Inspects and verifies signed package archives.
//!
//! # Commands
//!
//! - `show <zip>`: print the decoded manifest in canonical encoding.
//! - `verify <archive>`: read every entry through the verifier and print
//!   `<path> <status> [signers]`, one line per entry. Zip archives are read
//!   with random access; tar and gzip-compressed tar archives are read
//!   sequentially.
//!
//! Logging goes to stderr; set `RUST_LOG` to adjust (default `warn`).
//!
//! # Exit Codes
//!
//! - `0`: Success
//! - `1`: An entry or signature file failed verification
//! - `2`: Invalid arguments, configuration error, or unreadable archive

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use flate2::read::GzDecoder;
use tracing_subscriber::EnvFilter;

use pkg_manifest::archive::{is_ustar_header, is_zip_magic, EntryStream, SeekableArchive};
use pkg_manifest::verify::{DigestVerifierFactory, EntryState, Signer, VerifyPolicy};
use pkg_manifest::{
    ArchiveError, ArchiveFile, ArchiveStream, ReaderConfig, TarEntryStream, ZipArchive,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Parser)]
#[command(name = "pkg-manifest")]
#[command(about = "Inspect and verify signed package archives", long_about = None)]
struct Cli {
    /// Maximum physical manifest line length, terminator included
    #[arg(long, global = true)]
    max_line_len: Option<usize>,

    /// Maximum manifest size in bytes
    #[arg(long, global = true)]
    max_manifest_bytes: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the archive's manifest
    Show {
        /// Zip archive
        archive: PathBuf,
    },

    /// Read every entry and report its verification status
    Verify {
        /// Zip, tar or gzip-compressed tar archive
        archive: PathBuf,

        /// Read entries without verification
        #[arg(long)]
        no_verify: bool,

        /// Also check manifest digests of unsigned archives
        #[arg(long)]
        all_digests: bool,
    },
}

enum Failure {
    Integrity,
    Usage(String),
}

impl From<ArchiveError> for Failure {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Integrity(err) => {
                eprintln!("integrity failure: {err}");
                Failure::Integrity
            }
            other => Failure::Usage(other.to_string()),
        }
    }
}

impl From<io::Error> for Failure {
    fn from(err: io::Error) -> Self {
        ArchiveError::from(err).into()
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ReaderConfig::default();
    if let Some(n) = cli.max_line_len {
        config.max_line_len = n;
    }
    if let Some(n) = cli.max_manifest_bytes {
        config.max_manifest_bytes = n;
        config.max_meta_entry_bytes = config.max_meta_entry_bytes.max(n);
    }

    let result = match cli.command {
        Commands::Show { archive } => show(&archive, config),
        Commands::Verify {
            archive,
            no_verify,
            all_digests,
        } => {
            config.verify = !no_verify;
            let policy = if all_digests {
                VerifyPolicy::AllDigests
            } else {
                VerifyPolicy::SignedOnly
            };
            verify(&archive, config, DigestVerifierFactory::new(policy))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Integrity) => ExitCode::from(1),
        Err(Failure::Usage(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(2)
        }
    }
}

fn show(path: &Path, config: ReaderConfig) -> Result<(), Failure> {
    let zip = ZipArchive::open_path(path)?;
    let mut file = ArchiveFile::open(zip, config.without_verification())?;
    let Some(manifest) = file.manifest()? else {
        return Err(Failure::Usage(format!("{}: no manifest", path.display())));
    };
    let mut out = io::stdout().lock();
    manifest
        .write_to(&mut out)
        .map_err(|err| Failure::Usage(err.to_string()))?;
    out.flush()?;
    Ok(())
}

fn verify(path: &Path, config: ReaderConfig, factory: DigestVerifierFactory) -> Result<(), Failure> {
    let mut head = [0u8; 512];
    let n = read_head(&mut File::open(path)?, &mut head)?;
    let head = &head[..n];

    if is_zip_magic(head) {
        let zip = ZipArchive::open_path(path)?;
        return verify_random_access(zip, config, factory);
    }
    if head.starts_with(&GZIP_MAGIC) {
        let input = GzDecoder::new(BufReader::new(File::open(path)?));
        return verify_sequential(TarEntryStream::new(input), config, factory);
    }
    if is_ustar_header(head) {
        let input = BufReader::new(File::open(path)?);
        return verify_sequential(TarEntryStream::new(input), config, factory);
    }
    Err(Failure::Usage(format!(
        "{}: not a zip or tar archive",
        path.display()
    )))
}

fn read_head(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Tracks the worst outcome across entries.
#[derive(Default)]
struct Tally {
    failed: usize,
}

impl Tally {
    fn report(
        &mut self,
        out: &mut impl Write,
        path: &str,
        result: io::Result<Option<EntryState>>,
        signers: Option<&[Signer]>,
    ) -> io::Result<()> {
        let status = match result {
            Ok(Some(EntryState::Verified)) => "verified",
            Ok(Some(_)) => "incomplete",
            Ok(None) => "unverified",
            Err(err) => {
                self.failed += 1;
                tracing::debug!(path, error = %err, "entry failed");
                "FAILED"
            }
        };
        write!(out, "{path} {status}")?;
        for signer in signers.unwrap_or_default() {
            write!(out, " {}", signer.name)?;
        }
        writeln!(out)
    }

    fn finish(self) -> Result<(), Failure> {
        if self.failed > 0 {
            eprintln!("{} entries failed verification", self.failed);
            return Err(Failure::Integrity);
        }
        Ok(())
    }
}

fn verify_random_access<A: SeekableArchive>(
    archive: A,
    config: ReaderConfig,
    factory: DigestVerifierFactory,
) -> Result<(), Failure> {
    let mut file = ArchiveFile::with_verifier(archive, config, factory)?;
    let paths: Vec<String> = file
        .entries()
        .iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.path.clone())
        .collect();

    let mut out = io::stdout().lock();
    let mut tally = Tally::default();
    for path in &paths {
        let result = match file.open_entry(path) {
            Ok(Some(mut entry)) => io::copy(&mut entry, &mut io::sink()).map(|_| entry.state()),
            Ok(None) => continue,
            Err(ArchiveError::Integrity(err)) => Err(err.into_io()),
            Err(err) => return Err(err.into()),
        };
        tally.report(&mut out, path, result, file.signers(path))?;
    }
    tally.finish()
}

fn verify_sequential<S: EntryStream>(
    stream: S,
    config: ReaderConfig,
    factory: DigestVerifierFactory,
) -> Result<(), Failure> {
    let mut archive = ArchiveStream::with_verifier(stream, config, factory)?;
    let mut out = io::stdout().lock();
    let mut tally = Tally::default();
    loop {
        let (path, result) = {
            let Some(mut entry) = archive.next_entry()? else {
                break;
            };
            if entry.info().is_dir {
                continue;
            }
            let result = io::copy(&mut entry, &mut io::sink()).map(|_| entry.state());
            (entry.path().to_string(), result)
        };
        tally.report(&mut out, &path, result, archive.signers(&path))?;
    }
    tally.finish()
}
