//! The split Zip writer: streams members through the compressor into the
//! volume writer, queues central directory records, and finalizes the
//! archive on close.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::arcname::sanitize_arcname;
use crate::compress::{CompressionMethod, EntryEncoder, DEFAULT_COMPRESSION_LEVEL};
use crate::result::*;
use crate::spec::{
    CentralDirectoryEntry, DataDescriptor, DosDateTime, EndOfCentralDirectory, LocalFileHeader,
};
use crate::volume::VolumeWriter;

/// Read granularity for streaming entry bodies.
pub const CHUNK_SIZE: usize = 64 * 1024;

// Zip32 wire limits.
const MAX_ENTRY_SIZE: u64 = u32::MAX as u64;
const MAX_ENTRIES: usize = u16::MAX as usize;

// General purpose bit flags (APPNOTE 4.4.4): sizes and CRC follow the body
// in a data descriptor; names are UTF-8.
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

const VERSION_MADE_BY: u16 = 20;

// DOS directory bit plus unix "drwxr-xr-x" in the high half.
const DIRECTORY_ATTRIBUTES: u32 = (0o40755 << 16) | 0x10;
const DEFAULT_FILE_ATTRIBUTES: u32 = 0o644 << 16;

pub type ProgressHook = Box<dyn FnMut(&str, u64, Option<u64>)>;

/// Per-entry overrides; anything unset falls back to the archive defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryOptions {
    compression: Option<CompressionMethod>,
    level: Option<u32>,
    modified: Option<DosDateTime>,
    expected_crc32: Option<u32>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = Some(method);
        self
    }

    /// DEFLATE level, 1 through 9.
    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn modified(mut self, stamp: DosDateTime) -> Self {
        self.modified = Some(stamp);
        self
    }

    /// Declares the CRC32 the caller expects the uncompressed bytes to have.
    /// A mismatch after streaming fails the entry with an integrity error.
    pub fn expected_crc32(mut self, crc32: u32) -> Self {
        self.expected_crc32 = Some(crc32);
        self
    }
}

enum WriterState {
    Open,
    /// Finalized; holds the volume list `close` keeps returning.
    Closed(Vec<PathBuf>),
    /// A write failed mid-entry, or the caller aborted.
    Aborted,
}

/// Writes a split Zip archive.
///
/// Members are added one at a time and streamed straight to disk; the
/// central directory is kept in memory and written by [`close`].
/// Dropping a writer without closing it abandons the partial volumes
/// (handles are released, nothing is renamed) — the error-path half of
/// scoped use. Call [`close`] for the success path.
///
/// [`close`]: SplitZipWriter::close
pub struct SplitZipWriter {
    volumes: VolumeWriter,
    compression: CompressionMethod,
    level: u32,
    entries: Vec<CentralDirectoryEntry>,
    on_progress: Option<ProgressHook>,
    state: WriterState,
}

impl SplitZipWriter {
    /// Creates a writer that will produce `path` (and `.zNN` siblings as
    /// needed), rolling volumes at `split_size` bytes.
    pub fn new<P: AsRef<Path>>(path: P, split_size: u64) -> ZipResult<Self> {
        Ok(SplitZipWriter {
            volumes: VolumeWriter::new(path.as_ref().to_path_buf(), split_size)?,
            compression: CompressionMethod::Deflated,
            level: DEFAULT_COMPRESSION_LEVEL,
            entries: Vec::new(),
            on_progress: None,
            state: WriterState::Open,
        })
    }

    /// Default compression method for entries that don't override it.
    pub fn set_compression(&mut self, method: CompressionMethod) {
        self.compression = method;
    }

    /// Default DEFLATE level (1-9) for entries that don't override it.
    pub fn set_level(&mut self, level: u32) -> ZipResult<()> {
        validate_level(level)?;
        self.level = level;
        Ok(())
    }

    /// Called right after each volume file is opened, volume 1 included.
    pub fn on_volume<F: FnMut(u32, &Path) + 'static>(&mut self, hook: F) {
        self.volumes.set_on_volume(Box::new(hook));
    }

    /// Called once per streamed chunk with the arcname, uncompressed bytes
    /// done so far, and the total when known.
    pub fn on_progress<F: FnMut(&str, u64, Option<u64>) + 'static>(&mut self, hook: F) {
        self.on_progress = Some(Box::new(hook));
    }

    /// The volumes created so far, in order.
    pub fn volume_paths(&self) -> Vec<PathBuf> {
        self.volumes.volume_paths().to_vec()
    }

    /// Adds a file or directory from disk. Directories descend recursively
    /// in name order; symlinks are skipped with a warning. The archive name
    /// defaults to the path's final component.
    pub fn add_path<P: AsRef<Path>>(
        &mut self,
        path: P,
        arcname: Option<&str>,
        options: &EntryOptions,
    ) -> ZipResult<()> {
        self.check_open()?;
        let path = path.as_ref();
        let metadata = fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            warn!("skipping symlink: {}", path.display());
            return Ok(());
        }
        let name = match arcname {
            Some(name) => name.to_string(),
            None => file_name_of(path)?,
        };
        if metadata.is_dir() {
            self.add_directory_tree(path, &name, options)
        } else {
            self.add_file(path, &name, &metadata, options)
        }
    }

    /// Adds an in-memory member. A name ending in `/` with an empty body is
    /// treated as a directory marker.
    pub fn add_bytes(
        &mut self,
        arcname: &str,
        data: &[u8],
        options: &EntryOptions,
    ) -> ZipResult<()> {
        self.check_open()?;
        let name = sanitize_arcname(arcname)?;
        if name.ends_with('/') && data.is_empty() {
            let stamp = options.modified.unwrap_or_else(DosDateTime::now);
            return self.add_directory_entry(&name, stamp);
        }
        if data.len() as u64 > MAX_ENTRY_SIZE {
            return Err(SplitZipError::Overflow("entry larger than 4 GiB"));
        }
        self.check_entry_limit()?;
        let (method, level) = self.resolve_options(options)?;
        let modified = options.modified.unwrap_or_else(DosDateTime::now);
        let mut source = data;
        let result = self.stream_entry(
            &name,
            &mut source,
            Some(data.len() as u64),
            modified,
            DEFAULT_FILE_ATTRIBUTES,
            method,
            level,
            options.expected_crc32,
        );
        self.poison_on_err(result)
    }

    /// Adds a member from an arbitrary reader. `size_hint` only feeds the
    /// progress hook; streams of unknown length pass `None`.
    pub fn add_reader<R: Read>(
        &mut self,
        arcname: &str,
        mut reader: R,
        size_hint: Option<u64>,
        options: &EntryOptions,
    ) -> ZipResult<()> {
        self.check_open()?;
        let name = sanitize_arcname(arcname)?;
        self.check_entry_limit()?;
        let (method, level) = self.resolve_options(options)?;
        let modified = options.modified.unwrap_or_else(DosDateTime::now);
        let result = self.stream_entry(
            &name,
            &mut reader,
            size_hint,
            modified,
            DEFAULT_FILE_ATTRIBUTES,
            method,
            level,
            options.expected_crc32,
        );
        self.poison_on_err(result)
    }

    /// Adds an explicit directory marker (a trailing slash is appended if
    /// missing).
    pub fn add_directory(&mut self, arcname: &str) -> ZipResult<()> {
        self.check_open()?;
        let name = sanitize_arcname(arcname)?;
        let name = ensure_trailing_slash(name);
        self.add_directory_entry(&name, DosDateTime::now())
    }

    /// Writes the central directory and the End Of Central Directory Record,
    /// renames the last volume to its final `.zip` name, and returns the
    /// ordered volume list. Idempotent: calling again returns the same list
    /// without touching the files.
    pub fn close(&mut self) -> ZipResult<Vec<PathBuf>> {
        match &self.state {
            WriterState::Closed(paths) => return Ok(paths.clone()),
            WriterState::Aborted => return Err(SplitZipError::Aborted),
            WriterState::Open => {}
        }
        let paths = self.finish_archive()?;
        self.state = WriterState::Closed(paths.clone());
        Ok(paths)
    }

    /// Abandons the archive: the open file handle is released, no central
    /// directory is written, and no volume is renamed. The partial `.zNN`
    /// files are left for the caller to delete.
    pub fn abort(&mut self) {
        if let WriterState::Closed(_) = self.state {
            return;
        }
        self.volumes.abort();
        self.state = WriterState::Aborted;
    }

    fn finish_archive(&mut self) -> ZipResult<Vec<PathBuf>> {
        // Everything from here on belongs on the last volume, which is
        // allowed to outgrow the split size.
        self.volumes.begin_final_volume()?;
        let cd_start_disk = self.volumes.disk();
        let cd_start_offset = self.volumes.offset();

        let mut cd_size: u64 = 0;
        for entry in &self.entries {
            let bytes = entry.to_bytes();
            self.volumes.write_splittable(&bytes)?;
            cd_size += bytes.len() as u64;
        }

        debug!(
            "central directory: {} entries, {} bytes, disk {} offset {}",
            self.entries.len(),
            cd_size,
            cd_start_disk,
            cd_start_offset
        );

        // The whole central directory sits on the final disk, so the
        // per-disk entry count equals the total.
        let entries = self.entries.len() as u16;
        let eocdr = EndOfCentralDirectory {
            disk_number: as_u16(self.volumes.disk(), "volume count")?,
            disk_with_central_directory: as_u16(cd_start_disk, "volume count")?,
            entries_on_this_disk: entries,
            entries,
            central_directory_size: as_u32(cd_size, "central directory size")?,
            central_directory_offset: as_u32(cd_start_offset, "central directory offset")?,
        };
        self.volumes.write_atomic(&eocdr.to_bytes())?;
        self.volumes.finalize_last_volume()
    }

    fn check_open(&self) -> ZipResult<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Closed(_) => Err(SplitZipError::Closed),
            WriterState::Aborted => Err(SplitZipError::Aborted),
        }
    }

    fn check_entry_limit(&self) -> ZipResult<()> {
        if self.entries.len() >= MAX_ENTRIES {
            return Err(SplitZipError::Overflow("more than 65535 entries"));
        }
        Ok(())
    }

    fn resolve_options(&self, options: &EntryOptions) -> ZipResult<(CompressionMethod, u32)> {
        let method = options.compression.unwrap_or(self.compression);
        let level = options.level.unwrap_or(self.level);
        validate_level(level)?;
        Ok((method, level))
    }

    /// Once bytes have hit the volume writer, any failure leaves a torn
    /// entry on disk; the archive can't be continued or finalized.
    fn poison_on_err<T>(&mut self, result: ZipResult<T>) -> ZipResult<T> {
        if result.is_err() {
            self.volumes.abort();
            self.state = WriterState::Aborted;
        }
        result
    }

    fn add_directory_tree(
        &mut self,
        path: &Path,
        arcname: &str,
        options: &EntryOptions,
    ) -> ZipResult<()> {
        let base = sanitize_arcname(arcname)?;
        let base = base.trim_end_matches('/').to_string();
        let metadata = fs::symlink_metadata(path)?;
        let stamp = options.modified.unwrap_or_else(|| modified_stamp(&metadata));
        self.add_directory_entry(&format!("{}/", base), stamp)?;

        let mut children = Vec::new();
        for child in fs::read_dir(path)? {
            children.push(child?.path());
        }
        children.sort();

        for child in children {
            let metadata = fs::symlink_metadata(&child)?;
            if metadata.file_type().is_symlink() {
                warn!("skipping symlink: {}", child.display());
                continue;
            }
            let child_name = format!("{}/{}", base, file_name_of(&child)?);
            if metadata.is_dir() {
                self.add_directory_tree(&child, &child_name, options)?;
            } else {
                self.add_file(&child, &child_name, &metadata, options)?;
            }
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        path: &Path,
        arcname: &str,
        metadata: &fs::Metadata,
        options: &EntryOptions,
    ) -> ZipResult<()> {
        let name = sanitize_arcname(arcname)?;
        if metadata.len() > MAX_ENTRY_SIZE {
            return Err(SplitZipError::Overflow("entry larger than 4 GiB"));
        }
        self.check_entry_limit()?;
        let (method, level) = self.resolve_options(options)?;
        let modified = options.modified.unwrap_or_else(|| modified_stamp(metadata));
        let mut file = File::open(path)?;
        let result = self.stream_entry(
            &name,
            &mut file,
            Some(metadata.len()),
            modified,
            file_attributes(metadata),
            method,
            level,
            options.expected_crc32,
        );
        self.poison_on_err(result)
    }

    fn add_directory_entry(&mut self, name: &str, modified: DosDateTime) -> ZipResult<()> {
        self.check_entry_limit()?;
        let result = self.emit_directory_entry(name, modified);
        self.poison_on_err(result)
    }

    fn emit_directory_entry(&mut self, name: &str, modified: DosDateTime) -> ZipResult<()> {
        let method = CompressionMethod::Stored;
        // Sizes and CRC of an empty body are known up front, so directory
        // markers carry no data descriptor.
        let header = LocalFileHeader {
            minimum_extract_version: method.minimum_extract_version(),
            flags: FLAG_UTF8,
            compression_method: method.as_u16(),
            mod_time: modified.time,
            mod_date: modified.date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: name.as_bytes(),
        };
        let header_bytes = header.to_bytes();
        let (start_disk, header_offset) =
            self.volumes.reserve_for_atomic(header_bytes.len() as u64)?;
        self.volumes.write_atomic(&header_bytes)?;

        self.entries.push(CentralDirectoryEntry {
            version_made_by: VERSION_MADE_BY,
            minimum_extract_version: method.minimum_extract_version(),
            flags: FLAG_UTF8,
            compression_method: method.as_u16(),
            mod_time: modified.time,
            mod_date: modified.date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number_start: as_u16(start_disk, "volume count")?,
            internal_attributes: 0,
            external_attributes: DIRECTORY_ATTRIBUTES,
            local_header_offset: as_u32(header_offset, "local header offset")?,
            file_name: name.as_bytes().to_vec(),
        });
        Ok(())
    }

    fn stream_entry(
        &mut self,
        name: &str,
        source: &mut dyn Read,
        size_hint: Option<u64>,
        modified: DosDateTime,
        external_attributes: u32,
        method: CompressionMethod,
        level: u32,
        expected_crc32: Option<u32>,
    ) -> ZipResult<()> {
        let flags = FLAG_DATA_DESCRIPTOR | FLAG_UTF8;
        // CRC and sizes aren't known yet; they follow the body in the data
        // descriptor, so the header carries zeros.
        let header = LocalFileHeader {
            minimum_extract_version: method.minimum_extract_version(),
            flags,
            compression_method: method.as_u16(),
            mod_time: modified.time,
            mod_date: modified.date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: name.as_bytes(),
        };
        let header_bytes = header.to_bytes();
        let (start_disk, header_offset) =
            self.volumes.reserve_for_atomic(header_bytes.len() as u64)?;
        self.volumes.write_atomic(&header_bytes)?;

        let mut encoder = EntryEncoder::new(method, level);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let produced = encoder.update(&buf[..n])?;
            self.volumes.write_splittable(&produced)?;
            if encoder.uncompressed_size() > MAX_ENTRY_SIZE
                || encoder.compressed_size() > MAX_ENTRY_SIZE
            {
                return Err(SplitZipError::Overflow("entry larger than 4 GiB"));
            }
            if let Some(hook) = self.on_progress.as_mut() {
                hook(name, encoder.uncompressed_size(), size_hint);
            }
        }
        let digest = encoder.finish()?;
        self.volumes.write_splittable(&digest.tail)?;
        if digest.uncompressed_size > MAX_ENTRY_SIZE || digest.compressed_size > MAX_ENTRY_SIZE {
            return Err(SplitZipError::Overflow("entry larger than 4 GiB"));
        }
        if let Some(expected) = expected_crc32 {
            if expected != digest.crc32 {
                return Err(SplitZipError::Integrity {
                    name: name.to_string(),
                    expected,
                    actual: digest.crc32,
                });
            }
        }

        let descriptor = DataDescriptor {
            crc32: digest.crc32,
            compressed_size: digest.compressed_size as u32,
            uncompressed_size: digest.uncompressed_size as u32,
        };
        self.volumes.write_atomic(&descriptor.to_bytes())?;

        self.entries.push(CentralDirectoryEntry {
            version_made_by: VERSION_MADE_BY,
            minimum_extract_version: method.minimum_extract_version(),
            flags,
            compression_method: method.as_u16(),
            mod_time: modified.time,
            mod_date: modified.date,
            crc32: digest.crc32,
            compressed_size: digest.compressed_size as u32,
            uncompressed_size: digest.uncompressed_size as u32,
            disk_number_start: as_u16(start_disk, "volume count")?,
            internal_attributes: 0,
            external_attributes,
            local_header_offset: as_u32(header_offset, "local header offset")?,
            file_name: name.as_bytes().to_vec(),
        });
        Ok(())
    }
}

impl Drop for SplitZipWriter {
    fn drop(&mut self) {
        if let WriterState::Open = self.state {
            self.abort();
        }
    }
}

/// Creates a split archive from a list of files and directories in one call.
pub fn create<P, Q>(path: P, inputs: &[Q], split_size: u64) -> ZipResult<Vec<PathBuf>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut writer = SplitZipWriter::new(path, split_size)?;
    let options = EntryOptions::default();
    for input in inputs {
        writer.add_path(input, None, &options)?;
    }
    writer.close()
}

fn validate_level(level: u32) -> ZipResult<()> {
    if !(1..=9).contains(&level) {
        return Err(SplitZipError::Config(format!(
            "Compression level {} out of range 1-9",
            level
        )));
    }
    Ok(())
}

fn ensure_trailing_slash(mut name: String) -> String {
    if !name.ends_with('/') {
        name.push('/');
    }
    name
}

fn file_name_of(path: &Path) -> ZipResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| SplitZipError::UnsafePath(path.display().to_string()))
}

fn modified_stamp(metadata: &fs::Metadata) -> DosDateTime {
    metadata
        .modified()
        .map(DosDateTime::from_system_time)
        .unwrap_or_default()
}

#[cfg(unix)]
fn file_attributes(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    (metadata.permissions().mode() & 0o777) << 16
}

#[cfg(not(unix))]
fn file_attributes(_metadata: &fs::Metadata) -> u32 {
    DEFAULT_FILE_ATTRIBUTES
}

fn as_u16(value: u32, what: &'static str) -> ZipResult<u16> {
    use std::convert::TryFrom;
    u16::try_from(value).map_err(|_| SplitZipError::Overflow(what))
}

fn as_u32(value: u64, what: &'static str) -> ZipResult<u32> {
    use std::convert::TryFrom;
    u32::try_from(value).map_err(|_| SplitZipError::Overflow(what))
}
