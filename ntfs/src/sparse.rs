// Sparse file streaming.
//
// A sparse stream reads only the allocated ranges of a file, in offset
// order, skipping holes instead of zero-filling them. A skip shows up to
// the caller as a read returning fewer bytes than requested (possibly 0)
// while the cursor jumps to the next allocated region.

use crate::interpreter::{DataRun, NtfsInterpreter};
use log::{debug, trace};
use magpie_core::{resolve_seek, ByteStream, MagpieError, Result};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;

/// Chunk size of the fallback content scanner.
pub const SCAN_CHUNK: usize = 64 * 1024;

/// One allocated byte range of a file. Regions are sorted by start offset,
/// pairwise disjoint, and lie within the nominal file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRegion {
    pub start_offset: u64,
    pub length: u64,
}

impl DataRegion {
    pub fn end(&self) -> u64 {
        self.start_offset + self.length
    }
}

/// Turn a decoded `$DATA` run list into allocated byte regions. Runs with
/// an LCN are allocated, runs without are holes; adjacent allocated runs
/// merge into one region. Regions are clipped to `file_len`.
pub fn regions_from_runs(runs: &[DataRun], bytes_per_cluster: u32, file_len: u64) -> Vec<DataRegion> {
    let mut regions: Vec<DataRegion> = Vec::new();
    let mut offset = 0u64;

    for run in runs {
        let run_bytes = run.length * bytes_per_cluster as u64;
        if run.lcn.is_some() && offset < file_len {
            let length = run_bytes.min(file_len - offset);
            match regions.last_mut() {
                Some(last) if last.end() == offset => last.length += length,
                _ => regions.push(DataRegion { start_offset: offset, length }),
            }
        } else if run.lcn.is_none() {
            trace!("hole at offset {}: {} bytes", offset, run_bytes);
        }
        offset += run_bytes;
    }

    regions
}

/// Fallback region discovery: scan the dense stream in `SCAN_CHUNK` chunks
/// and treat chunks containing any non-zero byte as allocated.
///
/// This is a degraded mode: allocated chunks that happen to hold only
/// zeros are indistinguishable from holes here.
pub fn scan_regions(stream: &mut dyn ByteStream) -> Result<Vec<DataRegion>> {
    let file_len = stream.len();
    let mut regions: Vec<DataRegion> = Vec::new();
    let mut chunk = vec![0u8; SCAN_CHUNK];
    let mut offset = 0u64;

    stream.seek(SeekFrom::Start(0))?;
    while offset < file_len {
        let want = (SCAN_CHUNK as u64).min(file_len - offset) as usize;
        let mut filled = 0usize;
        while filled < want {
            let n = stream.read(&mut chunk[filled..want])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if chunk[..filled].iter().any(|&b| b != 0) {
            match regions.last_mut() {
                Some(last) if last.end() == offset => last.length += filled as u64,
                _ => regions.push(DataRegion { start_offset: offset, length: filled as u64 }),
            }
        }
        if filled < want {
            break;
        }
        offset += want as u64;
    }

    Ok(regions)
}

/// Byte stream over a sparse file that transparently skips holes.
pub struct SparseStream {
    inner: Box<dyn ByteStream>,
    regions: Vec<DataRegion>,
    length: u64,
    position: u64,
    current_region: usize,
}

impl SparseStream {
    /// Wrap a dense stream with a precomputed region list. The list must
    /// be sorted, disjoint, and within `[0, inner.len())`.
    pub fn new(inner: Box<dyn ByteStream>, regions: Vec<DataRegion>) -> Self {
        debug_assert!(regions.windows(2).all(|w| w[0].end() <= w[1].start_offset));
        let length = inner.len();
        debug_assert!(regions.last().map(|r| r.end() <= length).unwrap_or(true));
        Self { inner, regions, length, position: 0, current_region: 0 }
    }

    /// Build over `path`, preferring the interpreter's run list and
    /// falling back to the content scanner when no runs are exposed.
    pub fn discover(
        interpreter: &dyn NtfsInterpreter,
        path: &str,
        mut inner: Box<dyn ByteStream>,
    ) -> Result<Self> {
        let file_len = inner.len();
        let regions = match interpreter.data_runs(path)? {
            Some(runs) => {
                let regions = regions_from_runs(&runs, interpreter.bytes_per_cluster(), file_len);
                debug!(
                    "sparse '{}': {} regions from {} data runs",
                    path,
                    regions.len(),
                    runs.len()
                );
                regions
            }
            None => {
                debug!("sparse '{}': no run list, degraded zero-scan fallback", path);
                let regions = scan_regions(inner.as_mut())?;
                debug!("sparse '{}': {} regions from content scan", path, regions.len());
                regions
            }
        };
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self::new(inner, regions))
    }

    pub fn regions(&self) -> &[DataRegion] {
        &self.regions
    }

    /// Total allocated bytes across all regions.
    pub fn allocated_len(&self) -> u64 {
        self.regions.iter().map(|r| r.length).sum()
    }

    fn region_index_for(&self, position: u64) -> usize {
        self.regions.partition_point(|r| r.end() <= position)
    }
}

impl ByteStream for SparseStream {
    fn len(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = resolve_seek(pos, self.length, self.position)?;
        self.current_region = self.region_index_for(self.position);
        Ok(self.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }

        while self.current_region < self.regions.len()
            && self.regions[self.current_region].end() <= self.position
        {
            self.current_region += 1;
        }

        // Past the last region: nothing but hole remains.
        if self.current_region == self.regions.len() {
            trace!("sparse read at {}: trailing hole, cursor to end", self.position);
            self.position = self.length;
            return Ok(0);
        }

        let region = self.regions[self.current_region];
        if self.position < region.start_offset {
            if self.position + buf.len() as u64 <= region.start_offset {
                // The whole request lies in the hole: skip it.
                trace!(
                    "sparse read at {}: inside hole, skipping to {}",
                    self.position,
                    region.start_offset
                );
                self.position = region.start_offset;
                return Ok(0);
            }
            self.position = region.start_offset;
        }

        // Read from the region, never crossing its end.
        let want = (buf.len() as u64).min(region.end() - self.position) as usize;
        self.inner.seek(SeekFrom::Start(self.position))?;
        let mut got = 0usize;
        while got < want {
            let n = self.inner.read(&mut buf[got..want])?;
            if n == 0 {
                return Err(MagpieError::DeviceIo(format!(
                    "dense stream ended at {} inside allocated region",
                    self.position + got as u64
                )));
            }
            got += n;
        }

        self.position += got as u64;
        if self.position == region.end() {
            self.current_region += 1;
        }
        Ok(got)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::MemoryStream;

    // 100 bytes: data in [10, 30) and [50, 60), zero elsewhere.
    fn holey_data() -> Vec<u8> {
        let mut data = vec![0u8; 100];
        for (i, b) in data.iter_mut().enumerate().take(30).skip(10) {
            *b = i as u8;
        }
        for (i, b) in data.iter_mut().enumerate().take(60).skip(50) {
            *b = i as u8;
        }
        data
    }

    fn holey_regions() -> Vec<DataRegion> {
        vec![
            DataRegion { start_offset: 10, length: 20 },
            DataRegion { start_offset: 50, length: 10 },
        ]
    }

    fn holey_stream() -> SparseStream {
        SparseStream::new(Box::new(MemoryStream::new(holey_data())), holey_regions())
    }

    #[test]
    fn test_regions_from_runs_merges_and_clips() {
        let runs = vec![
            DataRun { lcn: Some(100), length: 2 },
            DataRun { lcn: Some(300), length: 1 }, // adjacent in file space
            DataRun { lcn: None, length: 3 },
            DataRun { lcn: Some(500), length: 2 },
        ];
        let regions = regions_from_runs(&runs, 4096, 7 * 4096 + 100);
        assert_eq!(
            regions,
            vec![
                DataRegion { start_offset: 0, length: 3 * 4096 },
                DataRegion { start_offset: 6 * 4096, length: 4096 + 100 },
            ]
        );
    }

    #[test]
    fn test_regions_invariants_hold() {
        let runs = vec![
            DataRun { lcn: None, length: 4 },
            DataRun { lcn: Some(9), length: 1 },
            DataRun { lcn: None, length: 2 },
            DataRun { lcn: Some(77), length: 3 },
        ];
        let file_len = 10 * 4096;
        let regions = regions_from_runs(&runs, 4096, file_len);

        let total: u64 = regions.iter().map(|r| r.length).sum();
        assert!(total <= file_len);
        for window in regions.windows(2) {
            assert!(window[0].end() <= window[1].start_offset);
            assert!(window[0].start_offset < window[1].start_offset);
        }
        for region in &regions {
            assert!(region.end() <= file_len);
        }
    }

    #[test]
    fn test_read_concatenates_allocated_content() {
        let mut stream = holey_stream();
        let all = stream.read_all().unwrap();
        let data = holey_data();
        let mut expected = data[10..30].to_vec();
        expected.extend_from_slice(&data[50..60]);
        assert_eq!(all, expected);
        assert_eq!(all.len() as u64, stream.allocated_len());
    }

    #[test]
    fn test_read_entirely_in_hole_skips() {
        let mut stream = holey_stream();
        let mut buf = [0u8; 5];
        // Cursor at 0, request of 5 fits inside the [0, 10) hole.
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.position(), 10);

        // Next read yields real data.
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(buf, [10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_read_never_crosses_region_end() {
        let mut stream = holey_stream();
        stream.seek(SeekFrom::Start(25)).unwrap();
        let mut buf = [0u8; 40];
        // Short read: only the region tail [25, 30).
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(stream.position(), 30);
    }

    #[test]
    fn test_trailing_hole_reads_zero_and_ends() {
        let mut stream = holey_stream();
        stream.seek(SeekFrom::Start(60)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.position(), stream.len());
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_recomputes_region_cursor() {
        let mut stream = holey_stream();
        let mut buf = [0u8; 64];

        stream.seek(SeekFrom::Start(55)).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], &[55, 56, 57, 58, 59]);

        // Seek backwards into the first region.
        stream.seek(SeekFrom::Start(12)).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 18);
        assert_eq!(buf[0], 12);
    }

    #[test]
    fn test_scan_regions_finds_nonzero_chunks() {
        // Two chunks of data around a chunk-aligned hole.
        let mut data = vec![0u8; 3 * SCAN_CHUNK];
        data[100] = 7;
        data[2 * SCAN_CHUNK + 5] = 9;
        let mut dense = MemoryStream::new(data);

        let regions = scan_regions(&mut dense).unwrap();
        assert_eq!(
            regions,
            vec![
                DataRegion { start_offset: 0, length: SCAN_CHUNK as u64 },
                DataRegion { start_offset: 2 * SCAN_CHUNK as u64, length: SCAN_CHUNK as u64 },
            ]
        );
    }

    #[test]
    fn test_scan_regions_merges_adjacent_chunks() {
        let mut data = vec![1u8; 2 * SCAN_CHUNK + 10];
        data[SCAN_CHUNK] = 2;
        let mut dense = MemoryStream::new(data);

        let regions = scan_regions(&mut dense).unwrap();
        assert_eq!(
            regions,
            vec![DataRegion { start_offset: 0, length: 2 * SCAN_CHUNK as u64 + 10 }]
        );
    }
}
