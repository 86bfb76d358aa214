use serde::{Deserialize, Serialize};

/// NTFS file attribute bits as stored in `$STANDARD_INFORMATION`.
pub mod attributes {
    pub const READ_ONLY: u32 = 0x0001;
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
    pub const NORMAL: u32 = 0x0080;
    pub const TEMPORARY: u32 = 0x0100;
    pub const SPARSE_FILE: u32 = 0x0200;
    pub const REPARSE_POINT: u32 = 0x0400;
    pub const COMPRESSED: u32 = 0x0800;
    pub const ENCRYPTED: u32 = 0x4000;
}

/// Resolved metadata for a file on the source volume.
///
/// Timestamps are raw FILETIME values (100ns ticks since 1601-01-01 UTC),
/// exactly as NTFS stores them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub full_path: String,
    pub size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub attributes: u32,
    /// Alternate data stream names, ordered and distinct (case-insensitive).
    pub ads_names: Vec<String>,
    /// Raw reparse target, present exactly when the reparse bit is set.
    pub link_target: Option<String>,
}

impl FileRecord {
    pub fn is_sparse(&self) -> bool {
        self.attributes & attributes::SPARSE_FILE != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.attributes & attributes::COMPRESSED != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes & attributes::REPARSE_POINT != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes & attributes::HIDDEN != 0
    }

    pub fn is_system(&self) -> bool {
        self.attributes & attributes::SYSTEM != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes & attributes::READ_ONLY != 0
    }
}

/// Resolved metadata for a directory on the source volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub full_path: String,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub attributes: u32,
    pub link_target: Option<String>,
}

impl DirectoryRecord {
    pub fn is_reparse_point(&self) -> bool {
        self.attributes & attributes::REPARSE_POINT != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes & attributes::HIDDEN != 0
    }

    pub fn is_system(&self) -> bool {
        self.attributes & attributes::SYSTEM != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_attributes(bits: u32) -> FileRecord {
        FileRecord {
            full_path: "C:\\test.bin".to_string(),
            size: 42,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            attributes: bits,
            ads_names: vec![],
            link_target: None,
        }
    }

    #[test]
    fn test_attribute_predicates() {
        let record = record_with_attributes(attributes::ARCHIVE | attributes::SPARSE_FILE);
        assert!(record.is_sparse());
        assert!(!record.is_compressed());
        assert!(!record.is_reparse_point());

        let record = record_with_attributes(attributes::REPARSE_POINT | attributes::HIDDEN);
        assert!(record.is_reparse_point());
        assert!(record.is_hidden());
        assert!(!record.is_sparse());
    }

    #[test]
    fn test_records_serialize() {
        let record = record_with_attributes(attributes::NORMAL);
        let json = serde_json::to_string(&record).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.full_path, record.full_path);
        assert_eq!(back.size, 42);
    }
}
