//! splitzip writes **split Zip archives** — multi-volume archives in the
//! standard PKWARE format, named `backup.z01`, `backup.z02`, ..., `backup.zip`
//! — that Windows Explorer, WinZip, 7-Zip, and `unzip` extract without
//! reassembly:
//!
//! ```no_run
//! use splitzip::{EntryOptions, SplitZipWriter};
//!
//! # fn main() -> splitzip::ZipResult<()> {
//! let mut archive = SplitZipWriter::new("backup.zip", splitzip::parse_size("100MB")?)?;
//! let options = EntryOptions::default();
//! archive.add_path("documents", None, &options)?;
//! archive.add_bytes("hello.txt", b"Hello, world!", &options)?;
//! let volumes = archive.close()?;
//! println!("wrote {} volume(s)", volumes.len());
//! # Ok(())
//! # }
//! ```
//!
//! Members are compressed (raw DEFLATE, or stored verbatim) and streamed
//! straight to disk, so memory use stays flat no matter how large the
//! inputs are. Volumes roll over at a configurable split size; payload
//! bytes may span a volume boundary, but headers never do — that is the
//! convention standard extractors demand of split archives.
//!
//! The writer is Zip32 only: entries up to 4 GiB, at most 65 535 of them.
//! There is no support for reading or updating archives, nor for Zip64,
//! encryption, or compression schemes beyond DEFLATE.
//!
//! Dropping a writer without calling [`SplitZipWriter::close`] abandons the
//! archive: file handles are released and the partial volumes are left on
//! disk for the caller to delete. Only `close` produces a valid archive.

pub mod result;
pub mod size;
pub mod write;

pub use compress::CompressionMethod;
pub use result::{SplitZipError, ZipResult};
pub use size::{format_size, parse_size};
pub use spec::DosDateTime;
pub use write::{create, EntryOptions, SplitZipWriter};

mod arcname;
mod compress;
mod spec;
mod volume;
