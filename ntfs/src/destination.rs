// Destination seam for copies.
//
// The reader stack emits stream writes; the host binds them to its local
// file API. ADS creation on the destination goes through the host's own
// ADS-capable open, the stack only supplies the bytes.

use crate::timestamps::filetime_to_system;
use log::{debug, warn};
use magpie_core::{MagpieError, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// A single destination stream being written.
pub trait DestinationStream {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Host-side destination file API.
pub trait Destination {
    /// Whether the destination primary file already exists.
    fn exists(&self, path: &str) -> bool;

    /// Create the directory and any missing parents.
    fn create_dir_all(&mut self, path: &str) -> Result<()>;

    /// Create and open a destination stream: the primary when `ads` is
    /// `None`, the named alternate stream otherwise.
    fn create_stream(&mut self, path: &str, ads: Option<&str>) -> Result<Box<dyn DestinationStream>>;

    /// Best-effort timestamp propagation; times are FILETIME values.
    fn set_timestamps(&mut self, _path: &str, _creation: u64, _last_write: u64, _last_access: u64) -> Result<()> {
        Ok(())
    }

    /// Best-effort attribute propagation.
    fn set_attributes(&mut self, _path: &str, _attributes: u32) -> Result<()> {
        Ok(())
    }
}

/// `std::fs` backed destination on the host filesystem.
#[derive(Debug, Default)]
pub struct LocalDestination;

impl LocalDestination {
    pub fn new() -> Self {
        Self
    }
}

struct LocalStream {
    file: File,
    path: String,
}

impl DestinationStream for LocalStream {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .map_err(|e| MagpieError::DestinationWrite(format!("'{}': {}", self.path, e)))
    }

    fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| MagpieError::DestinationWrite(format!("'{}': {}", self.path, e)))
    }
}

impl Destination for LocalDestination {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| MagpieError::DestinationWrite(format!("mkdir '{}': {}", path, e)))
    }

    fn create_stream(&mut self, path: &str, ads: Option<&str>) -> Result<Box<dyn DestinationStream>> {
        let full = match ads {
            Some(name) => {
                if !cfg!(windows) {
                    return Err(MagpieError::NotSupported(
                        "alternate data streams need an NTFS destination".to_string(),
                    ));
                }
                format!("{}:{}", path, name)
            }
            None => path.to_string(),
        };

        let file = File::create(&full)
            .map_err(|e| MagpieError::DestinationWrite(format!("create '{}': {}", full, e)))?;
        Ok(Box::new(LocalStream { file, path: full }))
    }

    fn set_timestamps(&mut self, path: &str, creation: u64, last_write: u64, last_access: u64) -> Result<()> {
        // Creation time is not settable through std; modified and access
        // times are.
        if creation != 0 {
            debug!("'{}': creation time {} not propagated", path, creation);
        }

        let mut times = std::fs::FileTimes::new();
        let mut any = false;
        if let Some(t) = filetime_to_system(last_write) {
            times = times.set_modified(t);
            any = true;
        }
        if let Some(t) = filetime_to_system(last_access) {
            times = times.set_accessed(t);
            any = true;
        }
        if !any {
            return Ok(());
        }

        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| MagpieError::DestinationWrite(format!("open '{}': {}", path, e)))?;
        file.set_times(times)
            .map_err(|e| MagpieError::DestinationWrite(format!("set times '{}': {}", path, e)))
    }

    fn set_attributes(&mut self, path: &str, attributes: u32) -> Result<()> {
        // std only exposes the read-only bit portably; the rest is logged
        // and dropped.
        let read_only = attributes & magpie_core::attributes::READ_ONLY != 0;
        let metadata = std::fs::metadata(path)
            .map_err(|e| MagpieError::DestinationWrite(format!("stat '{}': {}", path, e)))?;
        let mut permissions = metadata.permissions();
        if permissions.readonly() != read_only {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(read_only);
            std::fs::set_permissions(path, permissions).map_err(|e| {
                MagpieError::DestinationWrite(format!("set permissions '{}': {}", path, e))
            })?;
        }

        let dropped = attributes & !magpie_core::attributes::READ_ONLY;
        if dropped != 0 {
            warn!("'{}': attribute bits {:#x} not representable here", path, dropped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_local_destination_writes_primary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let path = path.to_str().unwrap();

        let mut destination = LocalDestination::new();
        assert!(!destination.exists(path));

        let mut stream = destination.create_stream(path, None).unwrap();
        stream.write_all(b"hello ").unwrap();
        stream.write_all(b"world").unwrap();
        stream.flush().unwrap();
        drop(stream);

        assert!(destination.exists(path));
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");
    }

    #[test]
    fn test_create_dir_all() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        let mut destination = LocalDestination::new();
        destination.create_dir_all(nested.to_str().unwrap()).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_set_timestamps_best_effort() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stamped.bin");
        std::fs::write(&path, b"x").unwrap();

        let mut destination = LocalDestination::new();
        // 2001-09-09 01:46:40 UTC as FILETIME.
        let filetime = (1_000_000_000u64 + 11_644_473_600) * 10_000_000;
        destination
            .set_timestamps(path.to_str().unwrap(), filetime, filetime, filetime)
            .unwrap();

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        let seconds = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(seconds, 1_000_000_000);
    }
}
