// Accessor facade: single entry point owning the device, the interpreter,
// and the session options.
//
// One accessor serves one volume from one thread. Disposal is idempotent;
// operations on a disposed accessor fail with `Disposed`, and streams
// already handed out start failing on their next access.

use crate::destination::Destination;
use crate::dir_reader::DirectoryReader;
use crate::file_reader::FileReader;
use crate::interpreter::NtfsInterpreter;
use crate::links::{LinkResolver, LinkTarget};
use crate::volume_stream::VolumeStream;
use log::info;
use magpie_core::{
    AccessOptions, ByteStream, DirectoryRecord, FileRecord, MagpieError, Result, SectorDevice,
    SectorGeometry,
};
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Session state for one opened volume.
pub struct VolumeHandle {
    drive_id: String,
    geometry: SectorGeometry,
    device: Option<Arc<dyn SectorDevice>>,
    interpreter: Arc<dyn NtfsInterpreter>,
}

impl VolumeHandle {
    pub fn drive_id(&self) -> &str {
        &self.drive_id
    }

    pub fn geometry(&self) -> SectorGeometry {
        self.geometry
    }
}

/// Read-only access to one mounted NTFS volume.
pub struct VolumeAccessor {
    handle: Option<VolumeHandle>,
    disposed: Arc<AtomicBool>,
    options: AccessOptions,
}

impl VolumeAccessor {
    /// Build over a sector device and the interpreter parsed from it.
    pub fn new(
        drive_id: &str,
        device: Arc<dyn SectorDevice>,
        interpreter: Arc<dyn NtfsInterpreter>,
        options: AccessOptions,
    ) -> Result<Self> {
        let geometry = device.geometry();
        if geometry.sector_size == 0 || !geometry.sector_size.is_power_of_two() {
            return Err(MagpieError::InvalidVolume(format!(
                "sector size {} is not a power of two",
                geometry.sector_size
            )));
        }
        Self::build(drive_id, Some(device), geometry, interpreter, options)
    }

    /// Build over an already parsed interpreter when the host keeps the
    /// raw device to itself. `raw_volume` is unavailable on such an
    /// accessor.
    pub fn from_interpreter(
        drive_id: &str,
        interpreter: Arc<dyn NtfsInterpreter>,
        options: AccessOptions,
    ) -> Result<Self> {
        let geometry = SectorGeometry { sector_size: 512, sector_count: 0 };
        Self::build(drive_id, None, geometry, interpreter, options)
    }

    fn build(
        drive_id: &str,
        device: Option<Arc<dyn SectorDevice>>,
        geometry: SectorGeometry,
        interpreter: Arc<dyn NtfsInterpreter>,
        options: AccessOptions,
    ) -> Result<Self> {
        if drive_id.is_empty() {
            return Err(MagpieError::InvalidArgument("empty drive identifier".to_string()));
        }
        if options.buffer_size == 0 {
            return Err(MagpieError::InvalidArgument("zero buffer size".to_string()));
        }

        info!("Volume accessor ready for {}", drive_id);
        Ok(Self {
            handle: Some(VolumeHandle {
                drive_id: drive_id.to_string(),
                geometry,
                device,
                interpreter,
            }),
            disposed: Arc::new(AtomicBool::new(false)),
            options,
        })
    }

    pub fn options(&self) -> &AccessOptions {
        &self.options
    }

    pub fn drive_id(&self) -> Result<&str> {
        Ok(self.handle()?.drive_id())
    }

    pub fn geometry(&self) -> Result<SectorGeometry> {
        Ok(self.handle()?.geometry())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Release the interpreter and the device. Further calls fail with
    /// `Disposed`; calling again is a no-op.
    pub fn dispose(&mut self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            if let Some(handle) = self.handle.take() {
                info!("Volume accessor for {} disposed", handle.drive_id);
            }
        }
    }

    fn handle(&self) -> Result<&VolumeHandle> {
        if self.is_disposed() {
            return Err(MagpieError::Disposed);
        }
        self.handle.as_ref().ok_or(MagpieError::Disposed)
    }

    fn file_reader(&self) -> Result<FileReader> {
        let handle = self.handle()?;
        Ok(FileReader::new(
            handle.interpreter.clone(),
            &handle.drive_id,
            self.options.clone(),
        ))
    }

    fn dir_reader(&self) -> Result<DirectoryReader> {
        let handle = self.handle()?;
        Ok(DirectoryReader::new(
            handle.interpreter.clone(),
            &handle.drive_id,
            self.options.clone(),
        ))
    }

    fn link_resolver(&self) -> Result<LinkResolver> {
        let handle = self.handle()?;
        Ok(LinkResolver::new(
            handle.interpreter.clone(),
            &handle.drive_id,
            self.options.clone(),
        ))
    }

    // Files.

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.file_reader()?.exists(path))
    }

    pub fn file_info(&self, path: &str, resolve_links: bool) -> Result<FileRecord> {
        self.file_reader()?.file_info(path, resolve_links)
    }

    /// Open a file or `file:ads` path. The stream stays valid until the
    /// accessor is disposed.
    pub fn open_file(&self, path: &str) -> Result<Box<dyn ByteStream>> {
        let inner = self.file_reader()?.open(path)?;
        Ok(Box::new(GuardedStream { inner, disposed: self.disposed.clone() }))
    }

    pub fn copy_file(
        &self,
        source: &str,
        dest: &str,
        overwrite: bool,
        destination: &mut dyn Destination,
    ) -> Result<u64> {
        self.file_reader()?.copy(source, dest, overwrite, destination)
    }

    pub fn hard_link_candidates(&self, path: &str) -> Result<Vec<String>> {
        self.file_reader()?.hard_link_candidates(path)
    }

    // Directories.

    pub fn dir_exists(&self, path: &str) -> Result<bool> {
        Ok(self.dir_reader()?.exists(path))
    }

    pub fn dir_info(&self, path: &str, resolve_links: bool) -> Result<DirectoryRecord> {
        self.dir_reader()?.dir_info(path, resolve_links)
    }

    pub fn list_files(
        &self,
        path: &str,
        pattern: &str,
        recurse: bool,
        resolve_links: bool,
    ) -> Result<Vec<FileRecord>> {
        self.dir_reader()?.list_files(path, pattern, recurse, resolve_links)
    }

    pub fn list_dirs(
        &self,
        path: &str,
        pattern: &str,
        recurse: bool,
        resolve_links: bool,
    ) -> Result<Vec<DirectoryRecord>> {
        self.dir_reader()?.list_dirs(path, pattern, recurse, resolve_links)
    }

    // Links.

    pub fn link_target(&self, path: &str) -> Result<Option<LinkTarget>> {
        self.link_resolver()?.link_target(path)
    }

    pub fn resolve_target(&self, path: &str) -> Result<String> {
        self.link_resolver()?.resolve_target(path)
    }

    // Raw access.

    /// Byte stream over the whole volume, starting at the boot sector.
    pub fn raw_volume(&self) -> Result<Box<dyn ByteStream>> {
        let handle = self.handle()?;
        let device = handle.device.clone().ok_or_else(|| {
            MagpieError::NotSupported("accessor was built without a sector device".to_string())
        })?;
        Ok(Box::new(GuardedStream {
            inner: Box::new(VolumeStream::new(device)),
            disposed: self.disposed.clone(),
        }))
    }
}

impl Drop for VolumeAccessor {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Stream wrapper that starts failing once the owning accessor is gone.
struct GuardedStream {
    inner: Box<dyn ByteStream>,
    disposed: Arc<AtomicBool>,
}

impl GuardedStream {
    fn check(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MagpieError::Disposed);
        }
        Ok(())
    }
}

impl ByteStream for GuardedStream {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check()?;
        self.inner.seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}
