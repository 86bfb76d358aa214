// Alternate data stream enumeration and opening.
//
// An ADS is addressed through the interpreter by the composed logical
// path `file:stream`. Sparse base files get their streams wrapped in the
// sparse-aware reader.

use crate::interpreter::NtfsInterpreter;
use crate::paths;
use crate::sparse::SparseStream;
use log::trace;
use magpie_core::{ByteStream, MagpieError, Result};
use std::sync::Arc;

pub struct AdsHandler {
    interpreter: Arc<dyn NtfsInterpreter>,
}

impl AdsHandler {
    pub fn new(interpreter: Arc<dyn NtfsInterpreter>) -> Self {
        Self { interpreter }
    }

    /// Alternate data stream names of `path`, in interpreter order,
    /// case-insensitively de-duplicated.
    pub fn enumerate(&self, path: &str) -> Result<Vec<String>> {
        let local = paths::normalize(path);
        if !self.interpreter.file_exists(&local)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for name in self.interpreter.alternate_data_streams(&local)? {
            if seen.insert(name.to_uppercase()) {
                names.push(name);
            }
        }
        trace!("'{}': {} alternate data streams", path, names.len());
        Ok(names)
    }

    /// Open one ADS of `path`. `is_sparse` comes from the base file's
    /// attributes and selects the sparse-aware stream.
    pub fn open(&self, path: &str, ads_name: &str, is_sparse: bool) -> Result<Box<dyn ByteStream>> {
        if ads_name.is_empty() {
            return Err(MagpieError::InvalidArgument(
                "alternate data stream name is empty".to_string(),
            ));
        }

        let local = paths::normalize(path);
        if !self.interpreter.file_exists(&local)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }

        let composed = format!("{}:{}", local, ads_name);
        let dense = self.interpreter.open_file(&composed).map_err(|e| {
            MagpieError::AdsOpen(format!("'{}': {}", composed, e))
        })?;

        if is_sparse {
            let stream = SparseStream::discover(self.interpreter.as_ref(), &composed, dense)?;
            Ok(Box::new(stream))
        } else {
            Ok(dense)
        }
    }
}
