use crate::error::{MagpieError, Result};
use log::info;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

/// Sector geometry of an opened volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorGeometry {
    pub sector_size: u32,
    pub sector_count: u64,
}

impl SectorGeometry {
    pub fn total_bytes(&self) -> u64 {
        self.sector_size as u64 * self.sector_count
    }
}

/// Raw sector-granular access to a mounted volume or a volume image.
///
/// `read_sectors` returns exactly `count * sector_size` bytes or fails;
/// there are no partial reads. Implementations are the platform seam: the
/// host opens the device (a `\\.\X:` namespace path, a block device, an
/// image file) and hands the handle in behind this trait.
pub trait SectorDevice: Send + Sync {
    /// Sector size in bytes.
    fn sector_size(&self) -> u32;

    /// Number of sectors on the volume.
    fn sector_count(&self) -> u64;

    /// Read `count` sectors starting at `first_lba`.
    fn read_sectors(&self, first_lba: u64, count: u32) -> Result<Vec<u8>>;

    fn geometry(&self) -> SectorGeometry {
        SectorGeometry {
            sector_size: self.sector_size(),
            sector_count: self.sector_count(),
        }
    }
}

/// Sector device backed by an ordinary file, typically a dumped volume
/// image. On platforms where raw volumes are exposed as files this also
/// works against the live device node.
pub struct FileSectorDevice {
    // File reads need a seek first, and seeking takes &mut, so the handle
    // sits behind a mutex even though the device itself is read-only.
    file: Mutex<File>,
    sector_size: u32,
    sector_count: u64,
}

impl FileSectorDevice {
    /// Open `path` with the given sector size. The sector count is derived
    /// from the current file length, rounded down to whole sectors.
    pub fn open(path: &Path, sector_size: u32) -> Result<Self> {
        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(MagpieError::InvalidVolume(format!(
                "sector size {} is not a power of two",
                sector_size
            )));
        }

        let file = File::open(path)
            .map_err(|e| MagpieError::DeviceIo(format!("open '{}': {}", path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| MagpieError::DeviceIo(format!("stat '{}': {}", path.display(), e)))?
            .len();
        let sector_count = len / sector_size as u64;

        info!(
            "Opened sector device '{}': {} sectors of {} bytes",
            path.display(),
            sector_count,
            sector_size
        );

        Ok(Self {
            file: Mutex::new(file),
            sector_size,
            sector_count,
        })
    }
}

impl SectorDevice for FileSectorDevice {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sectors(&self, first_lba: u64, count: u32) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if first_lba + count as u64 > self.sector_count {
            return Err(MagpieError::DeviceIo(format!(
                "sector range {}..{} beyond device end ({} sectors)",
                first_lba,
                first_lba + count as u64,
                self.sector_count
            )));
        }

        let offset = first_lba * self.sector_size as u64;
        let mut buffer = vec![0u8; count as usize * self.sector_size as usize];

        let mut file = self
            .file
            .lock()
            .map_err(|_| MagpieError::DeviceIo("device handle poisoned".to_string()))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| MagpieError::DeviceIo(format!("seek to sector {}: {}", first_lba, e)))?;
        file.read_exact(&mut buffer)
            .map_err(|e| MagpieError::DeviceIo(format!("read sector {}: {}", first_lba, e)))?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockSectorDevice;

    #[test]
    fn test_geometry_total_bytes() {
        let geometry = SectorGeometry { sector_size: 512, sector_count: 8 };
        assert_eq!(geometry.total_bytes(), 4096);
    }

    #[test]
    fn test_mock_device_reads_exact_ranges() {
        let data: Vec<u8> = (0..=255).collect();
        let device = MockSectorDevice::new(64, data.clone());
        assert_eq!(device.sector_count(), 4);

        let sectors = device.read_sectors(1, 2).unwrap();
        assert_eq!(sectors.len(), 128);
        assert_eq!(&sectors[..], &data[64..192]);
    }

    #[test]
    fn test_mock_device_rejects_out_of_range() {
        let device = MockSectorDevice::new(64, vec![0u8; 256]);
        assert!(matches!(
            device.read_sectors(3, 2),
            Err(MagpieError::DeviceIo(_))
        ));
    }
}
