// Byte-addressable cursor over a sector device.
//
// Raw volume handles reject misaligned I/O, so every read is decomposed
// into an unaligned head sector, a run of aligned full-sector batches, and
// a tail sector. Batching amortizes the per-call overhead of the device.

use log::trace;
use magpie_core::{resolve_seek, ByteStream, MagpieError, Result, SectorDevice};
use std::io::SeekFrom;
use std::sync::Arc;

/// Upper bound on sectors fetched per device call.
pub const MAX_BATCH_SECTORS: u64 = 128;

/// Read-only, seekable byte view of a whole volume.
pub struct VolumeStream {
    device: Arc<dyn SectorDevice>,
    sector_size: u64,
    length: u64,
    position: u64,
}

impl VolumeStream {
    pub fn new(device: Arc<dyn SectorDevice>) -> Self {
        let geometry = device.geometry();
        Self {
            device,
            sector_size: geometry.sector_size as u64,
            length: geometry.total_bytes(),
            position: 0,
        }
    }
}

impl ByteStream for VolumeStream {
    fn len(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = resolve_seek(pos, self.length, self.position)?;
        Ok(self.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }

        // Clamp to the remaining volume length.
        let want = (buf.len() as u64).min(self.length - self.position) as usize;
        let ss = self.sector_size as usize;
        let mut copied = 0usize;
        let mut pos = self.position;

        trace!("volume read: {} bytes at {:#x}", want, pos);

        // Head: unaligned start inside a sector.
        let offset = (pos % self.sector_size) as usize;
        if offset != 0 {
            let sector = self.device.read_sectors(pos / self.sector_size, 1)?;
            let n = (ss - offset).min(want);
            buf[..n].copy_from_slice(&sector[offset..offset + n]);
            copied += n;
            pos += n as u64;
        }

        // Middle: whole sectors in batches.
        while want - copied >= ss {
            let batch = (((want - copied) / ss) as u64).min(MAX_BATCH_SECTORS);
            let data = self.device.read_sectors(pos / self.sector_size, batch as u32)?;
            let n = batch as usize * ss;
            buf[copied..copied + n].copy_from_slice(&data);
            copied += n;
            pos += n as u64;
        }

        // Tail: a final partial sector.
        if copied < want {
            let sector = self.device.read_sectors(pos / self.sector_size, 1)?;
            let n = want - copied;
            buf[copied..copied + n].copy_from_slice(&sector[..n]);
            copied += n;
            pos += n as u64;
        }

        self.position = pos;
        Ok(copied)
    }
}

impl std::io::Read for VolumeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        ByteStream::read(self, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl std::io::Seek for VolumeStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        ByteStream::seek(self, pos)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    }
}

impl std::io::Write for VolumeStream {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            MagpieError::NotSupported("volume stream is read-only".to_string()).to_string(),
        ))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::test_utils::MockSectorDevice;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn stream_over(sector_size: u32, data: Vec<u8>) -> (Arc<MockSectorDevice>, VolumeStream) {
        let device = Arc::new(MockSectorDevice::new(sector_size, data));
        let stream = VolumeStream::new(device.clone());
        (device, stream)
    }

    #[test]
    fn test_aligned_read() {
        let data = patterned(4096);
        let (_, mut stream) = stream_over(512, data.clone());

        let mut buf = vec![0u8; 1024];
        assert_eq!(stream.read(&mut buf).unwrap(), 1024);
        assert_eq!(buf, data[..1024]);
        assert_eq!(stream.position(), 1024);
    }

    #[test]
    fn test_unaligned_head_and_tail() {
        let data = patterned(4096);
        let (_, mut stream) = stream_over(512, data.clone());

        stream.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = vec![0u8; 1000];
        assert_eq!(stream.read(&mut buf).unwrap(), 1000);
        assert_eq!(buf, data[100..1100]);
    }

    #[test]
    fn test_small_read_inside_one_sector() {
        let data = patterned(2048);
        let (device, mut stream) = stream_over(512, data.clone());

        stream.seek(SeekFrom::Start(700)).unwrap();
        let mut buf = vec![0u8; 10];
        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        assert_eq!(buf, data[700..710]);
        // One sector fetch serves the whole request.
        assert_eq!(device.reads(), vec![(1, 1)]);
    }

    #[test]
    fn test_batching_caps_at_128_sectors() {
        let sectors = 300usize;
        let data = patterned(sectors * 512);
        let (device, mut stream) = stream_over(512, data.clone());

        let mut buf = vec![0u8; sectors * 512];
        assert_eq!(stream.read(&mut buf).unwrap(), sectors * 512);
        assert_eq!(buf, data);
        assert_eq!(device.reads(), vec![(0, 128), (128, 128), (256, 44)]);
    }

    #[test]
    fn test_clamps_to_volume_end() {
        let data = patterned(1024);
        let (_, mut stream) = stream_over(512, data.clone());

        stream.seek(SeekFrom::Start(1000)).unwrap();
        let mut buf = vec![0u8; 100];
        assert_eq!(stream.read(&mut buf).unwrap(), 24);
        assert_eq!(buf[..24], data[1000..]);

        // At the end: zero bytes.
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_device_fault_surfaces() {
        let device = Arc::new(MockSectorDevice::new(512, patterned(4096)).fail_at(3));
        let mut stream = VolumeStream::new(device);

        stream.seek(SeekFrom::Start(512)).unwrap();
        let mut buf = vec![0u8; 2048];
        assert!(matches!(stream.read(&mut buf), Err(MagpieError::DeviceIo(_))));
    }

    #[test]
    fn test_negative_seek_rejected() {
        let (_, mut stream) = stream_over(512, patterned(1024));
        assert!(matches!(
            stream.seek(SeekFrom::Current(-1)),
            Err(MagpieError::InvalidSeek(_))
        ));
    }

    #[test]
    fn test_writes_not_supported() {
        use std::io::Write;
        let (_, mut stream) = stream_over(512, patterned(512));
        assert!(stream.write(b"nope").is_err());
    }

    #[test]
    fn test_repeated_reads_identical() {
        let data = patterned(2048);
        let (_, mut stream) = stream_over(512, data);

        let mut first = vec![0u8; 777];
        stream.seek(SeekFrom::Start(33)).unwrap();
        stream.read(&mut first).unwrap();

        let mut second = vec![0u8; 777];
        stream.seek(SeekFrom::Start(33)).unwrap();
        stream.read(&mut second).unwrap();

        assert_eq!(first, second);
    }
}
