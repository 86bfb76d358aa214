pub mod device;
pub mod error;
pub mod options;
pub mod records;
pub mod stream;
pub mod test_utils;

pub use device::{FileSectorDevice, SectorDevice, SectorGeometry};
pub use error::{MagpieError, Result};
pub use options::AccessOptions;
pub use records::{attributes, DirectoryRecord, FileRecord};
pub use stream::{resolve_seek, ByteStream, MemoryStream};
