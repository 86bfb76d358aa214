// Read-only NTFS access stack over a raw volume handle.
//
// Layering, bottom up: a sector device (magpie-core) feeds the byte-level
// volume stream; an NTFS interpreter (external dependency behind the
// `NtfsInterpreter` trait) resolves paths and attributes; on top sit the
// sparse-aware stream, ADS handling, reparse link resolution, the file and
// directory readers, and the accessor facade that owns the lot.

pub mod accessor;
pub mod ads;
pub mod destination;
pub mod dir_reader;
pub mod file_reader;
pub mod interpreter;
pub mod links;
pub mod paths;
pub mod reparse;
pub mod sparse;
pub mod test_utils;
pub mod timestamps;
pub mod volume_stream;

pub use accessor::{VolumeAccessor, VolumeHandle};
pub use ads::AdsHandler;
pub use destination::{Destination, DestinationStream, LocalDestination};
pub use dir_reader::DirectoryReader;
pub use file_reader::FileReader;
pub use interpreter::{
    wildcard_match, DataRun, NtfsDirInfo, NtfsFileInfo, NtfsInterpreter, ReparseBuffer,
};
pub use links::{LinkKind, LinkResolver, LinkTarget};
pub use reparse::{HeaderLayout, ParsedReparse, ReparseKind};
pub use sparse::{DataRegion, SparseStream};
pub use volume_stream::VolumeStream;

// Re-export the shared core types so hosts can depend on one crate.
pub use magpie_core::{
    attributes, AccessOptions, ByteStream, DirectoryRecord, FileRecord, FileSectorDevice,
    MagpieError, MemoryStream, Result, SectorDevice, SectorGeometry,
};
