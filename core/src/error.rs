use thiserror::Error;

#[derive(Debug, Error)]
pub enum MagpieError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a usable NTFS volume: {0}")]
    InvalidVolume(String),

    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    #[error("Seek to negative position {0}")]
    InvalidSeek(i64),

    #[error("Unsupported reparse tag {0:#010x}")]
    UnsupportedReparseTag(u32),

    #[error("Link recursion at '{path}' (depth {depth})")]
    LinkRecursion { path: String, depth: u32 },

    #[error("Cannot open alternate data stream: {0}")]
    AdsOpen(String),

    #[error("Attribute read failed: {0}")]
    AttributeRead(String),

    #[error("Destination write failed: {0}")]
    DestinationWrite(String),

    #[error("Destination already exists: {0}")]
    AlreadyExists(String),

    #[error("Accessor has been disposed")]
    Disposed,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias used throughout the workspace
pub type Result<T> = std::result::Result<T, MagpieError>;

impl MagpieError {
    /// Whether a recursive enumeration may log this error and keep going
    /// instead of aborting the whole traversal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MagpieError::NotFound(_)
                | MagpieError::AttributeRead(_)
                | MagpieError::UnsupportedReparseTag(_)
                | MagpieError::LinkRecursion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(MagpieError::NotFound("x".into()).is_recoverable());
        assert!(MagpieError::UnsupportedReparseTag(0xDEAD_BEEF).is_recoverable());
        assert!(MagpieError::LinkRecursion { path: "a".into(), depth: 3 }.is_recoverable());

        assert!(!MagpieError::Disposed.is_recoverable());
        assert!(!MagpieError::DeviceIo("sector 9".into()).is_recoverable());
        assert!(!MagpieError::AlreadyExists("c:\\tmp\\x".into()).is_recoverable());
    }

    #[test]
    fn test_display_carries_context() {
        let err = MagpieError::UnsupportedReparseTag(0xA000_0001);
        assert!(err.to_string().contains("0xa0000001"));

        let err = MagpieError::LinkRecursion { path: "Docs".into(), depth: 10 };
        let text = err.to_string();
        assert!(text.contains("Docs"));
        assert!(text.contains("10"));
    }
}
