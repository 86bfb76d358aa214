use serde::{Deserialize, Serialize};

/// Per-session accessor options. Immutable once the accessor is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessOptions {
    /// Chunk size for stream-to-stream copies and sparse-region scanning.
    pub buffer_size: usize,
    /// Cap on transitive reparse point dereferences per resolution.
    pub max_link_depth: u32,
    /// Dereference reparse points with relative targets.
    pub follow_relative_links: bool,
    /// Dereference reparse points with absolute targets.
    pub follow_absolute_links: bool,
}

impl Default for AccessOptions {
    fn default() -> Self {
        Self {
            buffer_size: 4 * 1024 * 1024,
            max_link_depth: 10,
            follow_relative_links: true,
            follow_absolute_links: false,
        }
    }
}
