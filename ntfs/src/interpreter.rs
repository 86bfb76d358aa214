// Capability surface consumed from the NTFS structure parser.
//
// The stack does not walk the MFT itself; it drives whatever parser the
// host binds behind this trait. Paths handed in are volume-local: `\`
// separated, no drive prefix, no leading separator.

use magpie_core::{ByteStream, Result};

/// Metadata the parser returns for a file path.
#[derive(Debug, Clone, Copy)]
pub struct NtfsFileInfo {
    pub size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub attributes: u32,
}

/// Metadata the parser returns for a directory path.
#[derive(Debug, Clone, Copy)]
pub struct NtfsDirInfo {
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub attributes: u32,
}

/// Raw reparse point attribute: the tag plus the delivered buffer. Some
/// parsers strip the 8 byte tag/length header from `content`, some leave
/// it in; the reparse decoder probes both layouts.
#[derive(Debug, Clone)]
pub struct ReparseBuffer {
    pub tag: u32,
    pub content: Vec<u8>,
}

/// One entry of a decoded `$DATA` run list. `lcn` of `None` marks a hole
/// in a sparse file; `length` is in clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRun {
    pub lcn: Option<u64>,
    pub length: u64,
}

/// The NTFS parser dependency.
///
/// All operations are read-only and take volume-local paths. An ADS is
/// addressed by the composed form `file:stream` in `open_file` and
/// `data_runs`.
pub trait NtfsInterpreter: Send + Sync {
    fn file_exists(&self, path: &str) -> Result<bool>;

    fn dir_exists(&self, path: &str) -> Result<bool>;

    fn file_info(&self, path: &str) -> Result<NtfsFileInfo>;

    fn dir_info(&self, path: &str) -> Result<NtfsDirInfo>;

    /// Volume-local paths of the files directly under `path` whose last
    /// component matches `pattern` (`*`/`?` glob, case-insensitive).
    fn list_files(&self, path: &str, pattern: &str) -> Result<Vec<String>>;

    /// Same as `list_files` for immediate subdirectories.
    fn list_dirs(&self, path: &str, pattern: &str) -> Result<Vec<String>>;

    /// Open the dense data stream of a file or ADS.
    fn open_file(&self, path: &str) -> Result<Box<dyn ByteStream>>;

    /// Distinct alternate data stream names of a file.
    fn alternate_data_streams(&self, path: &str) -> Result<Vec<String>>;

    /// The raw reparse attribute of a reparse point.
    fn reparse_point(&self, path: &str) -> Result<ReparseBuffer>;

    fn bytes_per_cluster(&self) -> u32;

    /// Decoded `$DATA` run list when the parser exposes it; `None` lets
    /// the sparse layer fall back to content scanning.
    fn data_runs(&self, path: &str) -> Result<Option<Vec<DataRun>>>;

    /// GUID of the mounted volume, when known. Used to recognize
    /// `\??\Volume{...}` reparse targets that stay on this volume.
    fn volume_guid(&self) -> Option<String> {
        None
    }
}

/// Case-insensitive glob over a single path component: `*` matches any
/// run of characters, `?` exactly one.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().flat_map(|c| c.to_uppercase()).collect();
    let name: Vec<char> = name.chars().flat_map(|c| c.to_uppercase()).collect();

    // Iterative matcher with single-star backtracking.
    let (mut p, mut n) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_literal_and_case() {
        assert!(wildcard_match("SOFTWARE", "software"));
        assert!(wildcard_match("ntuser.dat", "NTUSER.DAT"));
        assert!(!wildcard_match("ntuser.dat", "ntuser.da"));
    }

    #[test]
    fn test_wildcard_star() {
        assert!(wildcard_match("*", "anything.at.all"));
        assert!(wildcard_match("*.evtx", "Security.evtx"));
        assert!(wildcard_match("NTUSER*", "ntuser.dat.LOG1"));
        assert!(!wildcard_match("*.evtx", "Security.evt"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "axxbyy"));
    }

    #[test]
    fn test_wildcard_question_mark() {
        assert!(wildcard_match("LOG?", "LOG1"));
        assert!(!wildcard_match("LOG?", "LOG"));
        assert!(wildcard_match("?at", "cat"));
        assert!(!wildcard_match("?at", "at"));
    }

    #[test]
    fn test_wildcard_empty() {
        assert!(wildcard_match("", ""));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("?", ""));
    }
}
