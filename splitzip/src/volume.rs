//! The multi-file byte sink underneath a split archive.
//!
//! Payload bytes may cross from one volume into the next
//! (`write_splittable`), but headers and the End Of Central Directory
//! Record must land whole on a single volume (`write_atomic`) — standard
//! extractors tolerate the former and reject the latter. Keeping that
//! distinction straight is this module's whole job.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

use crate::result::*;

/// Smallest permitted split size: room for a worst-case local file header
/// plus a useful amount of data.
pub const MIN_SPLIT_SIZE: u64 = 64 * 1024;

pub type VolumeHook = Box<dyn FnMut(u32, &Path)>;

/// Writes a sequence of volume files named `<stem>.z01`, `<stem>.z02`, ...,
/// `<stem>.zip`, rolling to the next volume when the split size is reached.
///
/// Volume 1 is opened directly under the final `.zip` name so that a
/// single-volume archive never touches a `.z01` path; the first rollover
/// renames it. Finalization renames whatever volume is current back to the
/// `.zip` name.
pub struct VolumeWriter {
    base_path: PathBuf,
    split_size: u64,
    file: Option<File>,
    /// 0-based index of the open volume; the wire format's "disk number".
    disk: u32,
    /// Bytes written to the open volume so far.
    offset: u64,
    total_written: u64,
    paths: Vec<PathBuf>,
    is_final: bool,
    finalized: bool,
    on_volume: Option<VolumeHook>,
}

impl VolumeWriter {
    pub fn new(base_path: PathBuf, split_size: u64) -> ZipResult<Self> {
        if split_size < MIN_SPLIT_SIZE {
            return Err(SplitZipError::VolumeTooSmall {
                split_size,
                min_required: MIN_SPLIT_SIZE,
            });
        }
        Ok(VolumeWriter {
            base_path,
            split_size,
            file: None,
            disk: 0,
            offset: 0,
            total_written: 0,
            paths: Vec::new(),
            is_final: false,
            finalized: false,
            on_volume: None,
        })
    }

    pub fn set_on_volume(&mut self, hook: VolumeHook) {
        self.on_volume = Some(hook);
    }

    /// 0-based index of the volume currently being written.
    pub fn disk(&self) -> u32 {
        self.disk
    }

    /// Byte offset within the volume currently being written.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn volume_paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn space_remaining(&self) -> u64 {
        self.split_size.saturating_sub(self.offset)
    }

    fn volume_path(&self, disk: u32) -> PathBuf {
        if disk == 0 {
            self.base_path.clone()
        } else {
            self.base_path.with_extension(format!("z{:02}", disk + 1))
        }
    }

    fn open_volume(&mut self, disk: u32) -> ZipResult<()> {
        let path = self.volume_path(disk);
        self.file = Some(File::create(&path)?);
        self.disk = disk;
        self.offset = 0;
        if !self.is_final && disk + 1 > 99 {
            warn!(
                "volume count exceeds 99 ({} volumes); some tools mishandle 3-digit suffixes",
                disk + 1
            );
        }
        if let Some(hook) = self.on_volume.as_mut() {
            hook(disk + 1, &path);
        }
        self.paths.push(path);
        Ok(())
    }

    fn ensure_open(&mut self) -> ZipResult<()> {
        if self.file.is_none() {
            self.open_volume(0)?;
        }
        Ok(())
    }

    fn roll_over(&mut self) -> ZipResult<()> {
        // Close the full volume before touching the next one
        self.file = None;
        if self.disk == 0 {
            // Volume 1 was opened under the final name; give it its
            // split-volume name now that we know there will be more.
            let z01 = self.base_path.with_extension("z01");
            fs::rename(&self.base_path, &z01)?;
            self.paths[0] = z01;
        }
        self.open_volume(self.disk + 1)
    }

    fn write_out(&mut self, data: &[u8]) -> ZipResult<()> {
        let file = self.file.as_mut().ok_or(SplitZipError::Closed)?;
        file.write_all(data)?;
        self.offset += data.len() as u64;
        self.total_written += data.len() as u64;
        Ok(())
    }

    /// Writes bytes that may cross volume boundaries, rolling over as often
    /// as needed. Used for entry bodies and central directory records.
    pub fn write_splittable(&mut self, mut data: &[u8]) -> ZipResult<()> {
        self.ensure_open()?;
        while !data.is_empty() {
            if self.is_final {
                return self.write_out(data);
            }
            let space = self.space_remaining();
            if space == 0 {
                self.roll_over()?;
                continue;
            }
            let take = (data.len() as u64).min(space) as usize;
            self.write_out(&data[..take])?;
            data = &data[take..];
            if !data.is_empty() {
                self.roll_over()?;
            }
        }
        Ok(())
    }

    fn ensure_space(&mut self, nbytes: u64) -> ZipResult<()> {
        self.ensure_open()?;
        if self.is_final {
            return Ok(());
        }
        if nbytes > self.split_size {
            return Err(SplitZipError::VolumeTooSmall {
                split_size: self.split_size,
                min_required: nbytes,
            });
        }
        // Filling a volume to the exact boundary is fine; only roll when
        // the write would actually spill over.
        if nbytes > self.space_remaining() {
            self.roll_over()?;
        }
        Ok(())
    }

    /// Writes bytes that must not cross a volume boundary, rolling to a
    /// fresh volume first if they would. Used for local file headers, data
    /// descriptors, and the End Of Central Directory Record.
    pub fn write_atomic(&mut self, data: &[u8]) -> ZipResult<()> {
        self.ensure_space(data.len() as u64)?;
        self.write_out(data)
    }

    /// Reports where the next `write_atomic` of `nbytes` will land, rolling
    /// over first if needed. Lets callers capture an entry's
    /// `(disk_number_start, local_header_offset)` before emitting its header.
    pub fn reserve_for_atomic(&mut self, nbytes: u64) -> ZipResult<(u32, u64)> {
        self.ensure_space(nbytes)?;
        Ok((self.disk, self.offset))
    }

    /// Lifts the split cap: everything from here on stays on the current
    /// volume, which will become the final `.zip`. The central directory and
    /// the EOCDR must not spill onto a further volume.
    pub fn begin_final_volume(&mut self) -> ZipResult<()> {
        self.ensure_open()?;
        self.is_final = true;
        Ok(())
    }

    /// Closes the current volume and renames it to the final `.zip` name.
    /// Idempotent; returns the full list of volume paths in order.
    pub fn finalize_last_volume(&mut self) -> ZipResult<Vec<PathBuf>> {
        if !self.finalized {
            self.file = None;
            if self.disk > 0 {
                let current = self.volume_path(self.disk);
                fs::rename(&current, &self.base_path)?;
                if let Some(last) = self.paths.last_mut() {
                    *last = self.base_path.clone();
                }
            }
            self.finalized = true;
        }
        Ok(self.paths.clone())
    }

    /// Releases the open file handle without finalizing. Partial volumes are
    /// left on disk under their in-progress names.
    pub fn abort(&mut self) {
        self.file = None;
        self.finalized = true;
    }
}
