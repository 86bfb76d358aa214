//! In-memory mock volume and destination. Tests drive the whole stack
//! against these; nothing here touches real hardware.

use crate::interpreter::{
    wildcard_match, DataRun, NtfsDirInfo, NtfsFileInfo, NtfsInterpreter, ReparseBuffer,
};
use crate::paths;
use crate::reparse::{IO_REPARSE_TAG_MOUNT_POINT, IO_REPARSE_TAG_SYMLINK, SYMLINK_FLAG_RELATIVE};
use magpie_core::{attributes, ByteStream, MagpieError, MemoryStream, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Arbitrary but stable default FILETIME (2022-07-14T02:40:00Z area).
pub const DEFAULT_FILETIME: u64 = 133_022_000_000_000_000;

struct MockFile {
    local: String,
    data: Option<Arc<Vec<u8>>>,
    info: NtfsFileInfo,
    ads: Vec<(String, Arc<Vec<u8>>)>,
    ads_runs: Vec<(String, Vec<DataRun>)>,
    reparse: Option<ReparseBuffer>,
    runs: Option<Vec<DataRun>>,
}

struct MockDir {
    local: String,
    info: NtfsDirInfo,
    reparse: Option<ReparseBuffer>,
}

/// In-memory NTFS interpreter: a tree of files, directories, alternate
/// streams, reparse buffers, and data runs.
pub struct MockVolume {
    files: BTreeMap<String, MockFile>,
    dirs: BTreeMap<String, MockDir>,
    bytes_per_cluster: u32,
    guid: Option<String>,
}

fn default_dir_info() -> NtfsDirInfo {
    NtfsDirInfo {
        creation_time: DEFAULT_FILETIME,
        last_access_time: DEFAULT_FILETIME,
        last_write_time: DEFAULT_FILETIME,
        attributes: attributes::DIRECTORY,
    }
}

impl MockVolume {
    pub fn new(bytes_per_cluster: u32) -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeMap::new(),
            bytes_per_cluster,
            guid: None,
        }
    }

    pub fn with_volume_guid(mut self, guid: &str) -> Self {
        self.guid = Some(guid.to_string());
        self
    }

    pub fn with_file(self, path: &str, data: Vec<u8>) -> Self {
        self.with_file_entry(
            path,
            data,
            attributes::ARCHIVE,
            (DEFAULT_FILETIME, DEFAULT_FILETIME, DEFAULT_FILETIME),
        )
    }

    /// Add a file with explicit attributes and `(creation, last_write,
    /// last_access)` FILETIME values.
    pub fn with_file_entry(
        mut self,
        path: &str,
        data: Vec<u8>,
        attrs: u32,
        times: (u64, u64, u64),
    ) -> Self {
        let local = paths::normalize(path);
        self.ensure_parents(&local);
        let info = NtfsFileInfo {
            size: data.len() as u64,
            creation_time: times.0,
            last_write_time: times.1,
            last_access_time: times.2,
            attributes: attrs,
        };
        self.files.insert(
            local.to_uppercase(),
            MockFile {
                local,
                data: Some(Arc::new(data)),
                info,
                ads: Vec::new(),
                ads_runs: Vec::new(),
                reparse: None,
                runs: None,
            },
        );
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        let local = paths::normalize(path);
        self.ensure_parents(&local);
        self.dirs.insert(
            local.to_uppercase(),
            MockDir { local, info: default_dir_info(), reparse: None },
        );
        self
    }

    pub fn with_ads(mut self, path: &str, name: &str, data: Vec<u8>) -> Self {
        let key = paths::key(path);
        let file = self.files.get_mut(&key).expect("ads on unknown file");
        file.ads.push((name.to_string(), Arc::new(data)));
        self
    }

    /// Add a sparse alternate data stream with its decoded run list.
    /// `data` is the full nominal content including zeroed holes.
    pub fn with_sparse_ads(
        mut self,
        path: &str,
        name: &str,
        data: Vec<u8>,
        runs: Vec<DataRun>,
    ) -> Self {
        let key = paths::key(path);
        let file = self.files.get_mut(&key).expect("ads on unknown file");
        file.ads.push((name.to_string(), Arc::new(data)));
        file.ads_runs.push((name.to_string(), runs));
        self
    }

    /// Add a sparse file: `data` is the full nominal content including
    /// zeroed holes, `runs` the decoded run list describing them.
    pub fn with_sparse_file(mut self, path: &str, data: Vec<u8>, runs: Vec<DataRun>) -> Self {
        self = self.with_file_entry(
            path,
            data,
            attributes::ARCHIVE | attributes::SPARSE_FILE,
            (DEFAULT_FILETIME, DEFAULT_FILETIME, DEFAULT_FILETIME),
        );
        let key = paths::key(path);
        self.files.get_mut(&key).unwrap().runs = Some(runs);
        self
    }

    /// Add a junction directory whose substitute name is `substitute`
    /// (NT namespace form, e.g. `\??\C:\Users`).
    pub fn with_junction(mut self, path: &str, substitute: &str) -> Self {
        let local = paths::normalize(path);
        self.ensure_parents(&local);
        let mut info = default_dir_info();
        info.attributes |= attributes::REPARSE_POINT;
        let print = substitute.strip_prefix("\\??\\").unwrap_or(substitute);
        self.dirs.insert(
            local.to_uppercase(),
            MockDir {
                local,
                info,
                reparse: Some(encode_mount_point(substitute, print, false)),
            },
        );
        self
    }

    /// Add a file symlink. Symlink nodes carry no unnamed data stream.
    pub fn with_symlink(mut self, path: &str, target: &str, relative: bool) -> Self {
        let local = paths::normalize(path);
        self.ensure_parents(&local);
        let info = NtfsFileInfo {
            size: 0,
            creation_time: DEFAULT_FILETIME,
            last_write_time: DEFAULT_FILETIME,
            last_access_time: DEFAULT_FILETIME,
            attributes: attributes::ARCHIVE | attributes::REPARSE_POINT,
        };
        self.files.insert(
            local.to_uppercase(),
            MockFile {
                local,
                data: None,
                info,
                ads: Vec::new(),
                ads_runs: Vec::new(),
                reparse: Some(encode_symlink(target, target, relative, false)),
                runs: None,
            },
        );
        self
    }

    /// Add a file carrying an arbitrary raw reparse buffer.
    pub fn with_raw_reparse_file(mut self, path: &str, tag: u32, content: Vec<u8>) -> Self {
        let local = paths::normalize(path);
        self.ensure_parents(&local);
        let info = NtfsFileInfo {
            size: 0,
            creation_time: DEFAULT_FILETIME,
            last_write_time: DEFAULT_FILETIME,
            last_access_time: DEFAULT_FILETIME,
            attributes: attributes::ARCHIVE | attributes::REPARSE_POINT,
        };
        self.files.insert(
            local.to_uppercase(),
            MockFile {
                local,
                data: None,
                info,
                ads: Vec::new(),
                ads_runs: Vec::new(),
                reparse: Some(ReparseBuffer { tag, content }),
                runs: None,
            },
        );
        self
    }

    fn ensure_parents(&mut self, local: &str) {
        let mut parent = paths::parent(local);
        while !parent.is_empty() {
            let key = parent.to_uppercase();
            self.dirs.entry(key).or_insert_with(|| MockDir {
                local: parent.clone(),
                info: default_dir_info(),
                reparse: None,
            });
            parent = paths::parent(&parent);
        }
    }

    fn file(&self, path: &str) -> Option<&MockFile> {
        self.files.get(&paths::key(path))
    }
}

impl NtfsInterpreter for MockVolume {
    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.file(path).is_some())
    }

    fn dir_exists(&self, path: &str) -> Result<bool> {
        let local = paths::normalize(path);
        Ok(local.is_empty() || self.dirs.contains_key(&local.to_uppercase()))
    }

    fn file_info(&self, path: &str) -> Result<NtfsFileInfo> {
        self.file(path)
            .map(|f| f.info)
            .ok_or_else(|| MagpieError::NotFound(path.to_string()))
    }

    fn dir_info(&self, path: &str) -> Result<NtfsDirInfo> {
        let local = paths::normalize(path);
        if local.is_empty() {
            return Ok(default_dir_info());
        }
        self.dirs
            .get(&local.to_uppercase())
            .map(|d| d.info)
            .ok_or_else(|| MagpieError::NotFound(path.to_string()))
    }

    fn list_files(&self, path: &str, pattern: &str) -> Result<Vec<String>> {
        if !self.dir_exists(path)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }
        let dir_key = paths::key(path);
        Ok(self
            .files
            .values()
            .filter(|f| paths::parent(&f.local).to_uppercase() == dir_key)
            .filter(|f| wildcard_match(pattern, paths::file_name(&f.local)))
            .map(|f| f.local.clone())
            .collect())
    }

    fn list_dirs(&self, path: &str, pattern: &str) -> Result<Vec<String>> {
        if !self.dir_exists(path)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }
        let dir_key = paths::key(path);
        Ok(self
            .dirs
            .values()
            .filter(|d| paths::parent(&d.local).to_uppercase() == dir_key && !d.local.is_empty())
            .filter(|d| wildcard_match(pattern, paths::file_name(&d.local)))
            .map(|d| d.local.clone())
            .collect())
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn ByteStream>> {
        let (base, ads) = paths::split_ads(path);
        let file = self
            .file(&base)
            .ok_or_else(|| MagpieError::NotFound(base.clone()))?;

        match ads {
            Some(name) => {
                let data = file
                    .ads
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(&name))
                    .map(|(_, d)| d.clone())
                    .ok_or_else(|| MagpieError::NotFound(format!("{}:{}", base, name)))?;
                Ok(Box::new(MemoryStream::from_shared(data)))
            }
            None => match &file.data {
                Some(data) => Ok(Box::new(MemoryStream::from_shared(data.clone()))),
                None => Err(MagpieError::Other(format!(
                    "'{}' has no unnamed data stream",
                    base
                ))),
            },
        }
    }

    fn alternate_data_streams(&self, path: &str) -> Result<Vec<String>> {
        let file = self
            .file(path)
            .ok_or_else(|| MagpieError::NotFound(path.to_string()))?;
        Ok(file.ads.iter().map(|(n, _)| n.clone()).collect())
    }

    fn reparse_point(&self, path: &str) -> Result<ReparseBuffer> {
        let local = paths::normalize(path);
        let buffer = self
            .file(&local)
            .and_then(|f| f.reparse.clone())
            .or_else(|| self.dirs.get(&local.to_uppercase()).and_then(|d| d.reparse.clone()));
        buffer.ok_or_else(|| MagpieError::AttributeRead(format!("'{}' has no reparse attribute", path)))
    }

    fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    fn data_runs(&self, path: &str) -> Result<Option<Vec<DataRun>>> {
        let (base, ads) = paths::split_ads(path);
        let Some(file) = self.file(&base) else {
            return Ok(None);
        };
        match ads {
            Some(name) => Ok(file
                .ads_runs
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&name))
                .map(|(_, runs)| runs.clone())),
            None => Ok(file.runs.clone()),
        }
    }

    fn volume_guid(&self) -> Option<String> {
        self.guid.clone()
    }
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn reparse_payload(fixed: &mut Vec<u8>, substitute: &str, print: &str) {
    let subst = utf16le(substitute);
    let print = utf16le(print);
    let header = [
        0u16,                // substitute offset
        subst.len() as u16,  // substitute length
        subst.len() as u16,  // print offset
        print.len() as u16,  // print length
    ];
    let mut out: Vec<u8> = header.iter().flat_map(|v| v.to_le_bytes()).collect();
    out.append(fixed);
    out.extend_from_slice(&subst);
    out.extend_from_slice(&print);
    *fixed = out;
}

fn with_optional_header(tag: u32, payload: Vec<u8>, embed_header: bool) -> ReparseBuffer {
    if !embed_header {
        return ReparseBuffer { tag, content: payload };
    }
    let mut content = Vec::with_capacity(payload.len() + 8);
    content.extend_from_slice(&tag.to_le_bytes());
    content.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    content.extend_from_slice(&0u16.to_le_bytes());
    content.extend_from_slice(&payload);
    ReparseBuffer { tag, content }
}

/// Encode a MOUNT_POINT reparse buffer, optionally with the 8 byte
/// tag/length header left in front of the payload.
pub fn encode_mount_point(substitute: &str, print: &str, embed_header: bool) -> ReparseBuffer {
    let mut payload = Vec::new();
    reparse_payload(&mut payload, substitute, print);
    with_optional_header(IO_REPARSE_TAG_MOUNT_POINT, payload, embed_header)
}

/// Encode a SYMLINK reparse buffer.
pub fn encode_symlink(substitute: &str, print: &str, relative: bool, embed_header: bool) -> ReparseBuffer {
    let flags: u32 = if relative { SYMLINK_FLAG_RELATIVE } else { 0 };
    let mut payload = flags.to_le_bytes().to_vec();
    reparse_payload(&mut payload, substitute, print);
    with_optional_header(IO_REPARSE_TAG_SYMLINK, payload, embed_header)
}

// Destination mock.

#[derive(Default)]
struct DestinationState {
    dirs: BTreeSet<String>,
    streams: BTreeMap<String, Vec<u8>>,
    timestamps: BTreeMap<String, (u64, u64, u64)>,
    attributes: BTreeMap<String, u32>,
    preexisting: BTreeSet<String>,
    stream_opens: usize,
}

/// Destination that records every stream byte-for-byte.
#[derive(Default)]
pub struct MockDestination {
    state: Arc<Mutex<DestinationState>>,
    fail_writes: bool,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stream write will fail with `DestinationWrite`.
    pub fn failing() -> Self {
        Self { state: Arc::default(), fail_writes: true }
    }

    /// Mark a destination path as already existing.
    pub fn preexisting(&mut self, path: &str) {
        self.state.lock().unwrap().preexisting.insert(path.to_string());
    }

    pub fn stream_count(&self) -> usize {
        self.state.lock().unwrap().stream_opens
    }

    pub fn bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().streams.get(path).cloned()
    }

    /// Recorded stream keys (`path` or `path:ads`), sorted.
    pub fn stream_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().streams.keys().cloned().collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    pub fn timestamps(&self, path: &str) -> Option<(u64, u64, u64)> {
        self.state.lock().unwrap().timestamps.get(path).copied()
    }

    pub fn attributes(&self, path: &str) -> Option<u32> {
        self.state.lock().unwrap().attributes.get(path).copied()
    }
}

struct MockDestinationStream {
    key: String,
    state: Arc<Mutex<DestinationState>>,
    fail: bool,
}

impl crate::destination::DestinationStream for MockDestinationStream {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.fail {
            return Err(MagpieError::DestinationWrite(format!("'{}': injected failure", self.key)));
        }
        self.state
            .lock()
            .unwrap()
            .streams
            .get_mut(&self.key)
            .expect("stream was created")
            .extend_from_slice(buf);
        Ok(())
    }
}

impl crate::destination::Destination for MockDestination {
    fn exists(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.preexisting.contains(path) || state.streams.contains_key(path)
    }

    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        self.state.lock().unwrap().dirs.insert(path.to_string());
        Ok(())
    }

    fn create_stream(
        &mut self,
        path: &str,
        ads: Option<&str>,
    ) -> Result<Box<dyn crate::destination::DestinationStream>> {
        let key = match ads {
            Some(name) => format!("{}:{}", path, name),
            None => path.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.stream_opens += 1;
        state.streams.insert(key.clone(), Vec::new());
        Ok(Box::new(MockDestinationStream {
            key,
            state: self.state.clone(),
            fail: self.fail_writes,
        }))
    }

    fn set_timestamps(&mut self, path: &str, creation: u64, last_write: u64, last_access: u64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .timestamps
            .insert(path.to_string(), (creation, last_write, last_access));
        Ok(())
    }

    fn set_attributes(&mut self, path: &str, attrs: u32) -> Result<()> {
        self.state.lock().unwrap().attributes.insert(path.to_string(), attrs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_volume_tree() {
        let volume = MockVolume::new(4096)
            .with_file("a\\b\\c.txt", b"x".to_vec())
            .with_file("a\\d.txt", b"y".to_vec());

        assert!(volume.dir_exists("a").unwrap());
        assert!(volume.dir_exists("a\\b").unwrap());
        assert!(volume.file_exists("a\\b\\c.txt").unwrap());
        assert!(!volume.file_exists("a\\b").unwrap());

        assert_eq!(volume.list_files("a", "*").unwrap(), vec!["a\\d.txt"]);
        assert_eq!(volume.list_dirs("a", "*").unwrap(), vec!["a\\b"]);
        assert_eq!(volume.list_dirs("", "*").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_mock_volume_case_insensitive() {
        let volume = MockVolume::new(4096).with_file("Windows\\Notepad.exe", b"x".to_vec());
        assert!(volume.file_exists("WINDOWS\\NOTEPAD.EXE").unwrap());
        assert_eq!(
            volume.list_files("windows", "note*").unwrap(),
            vec!["Windows\\Notepad.exe"]
        );
    }

    #[test]
    fn test_mock_destination_records_streams() {
        use crate::destination::Destination;

        let mut destination = MockDestination::new();
        let mut stream = destination.create_stream("out.bin", None).unwrap();
        stream.write_all(b"abc").unwrap();
        stream.write_all(b"def").unwrap();
        drop(stream);

        assert_eq!(destination.bytes("out.bin").unwrap(), b"abcdef");
        assert!(destination.exists("out.bin"));
        assert_eq!(destination.stream_count(), 1);
    }
}
