// Per-file operations: metadata, stream selection, whole-file copy.
//
// Stream selection picks the requested ADS or the primary stream, follows
// reparse points when policy allows, and wraps sparse files so holes are
// skipped instead of materialized.

use crate::ads::AdsHandler;
use crate::destination::{Destination, DestinationStream};
use crate::interpreter::NtfsInterpreter;
use crate::links::LinkResolver;
use crate::paths;
use crate::sparse::SparseStream;
use log::{debug, warn};
use magpie_core::{attributes, AccessOptions, ByteStream, FileRecord, MagpieError, Result};
use std::sync::Arc;

pub struct FileReader {
    interpreter: Arc<dyn NtfsInterpreter>,
    ads: AdsHandler,
    links: LinkResolver,
    drive_id: String,
    options: AccessOptions,
}

impl FileReader {
    pub fn new(interpreter: Arc<dyn NtfsInterpreter>, drive_id: &str, options: AccessOptions) -> Self {
        Self {
            ads: AdsHandler::new(interpreter.clone()),
            links: LinkResolver::new(interpreter.clone(), drive_id, options.clone()),
            interpreter,
            drive_id: drive_id.to_string(),
            options,
        }
    }

    /// Whether the base file exists. Interpreter failures read as absent.
    pub fn exists(&self, path: &str) -> bool {
        let (base, _) = paths::split_ads(path);
        self.interpreter
            .file_exists(&paths::normalize(&base))
            .unwrap_or(false)
    }

    /// Full metadata for a file, optionally chasing its link chain.
    pub fn file_info(&self, path: &str, resolve_links: bool) -> Result<FileRecord> {
        let (base, _ads) = paths::split_ads(path);
        let local = paths::normalize(&base);
        if local.is_empty() {
            return Err(MagpieError::InvalidArgument("empty file path".to_string()));
        }
        let display = paths::display(&base, &self.drive_id);
        self.record_at(&local, &display, resolve_links)
    }

    /// Build a record for a known volume-local path, reported under
    /// `display`. Listing uses this to keep caller-rooted paths.
    pub(crate) fn record_at(&self, local: &str, display: &str, resolve_links: bool) -> Result<FileRecord> {
        if !self.interpreter.file_exists(local)? {
            return Err(MagpieError::NotFound(display.to_string()));
        }
        let info = self.interpreter.file_info(local)?;

        let decoded_link = if info.attributes & attributes::REPARSE_POINT != 0 {
            self.links.link_target(display)?
        } else {
            None
        };

        if resolve_links {
            if let Some(link) = &decoded_link {
                if self.links.policy_allows(link) {
                    let resolved = self.links.resolve_target(display)?;
                    let resolved_local = paths::normalize(&resolved);
                    if !resolved_local.eq_ignore_ascii_case(local)
                        && self.interpreter.file_exists(&resolved_local)?
                    {
                        debug!("'{}' resolves to '{}'", display, resolved);
                        return self.record_at(&resolved_local, &resolved, false);
                    }
                }
            }
        }

        Ok(FileRecord {
            full_path: display.to_string(),
            size: info.size,
            creation_time: info.creation_time,
            last_access_time: info.last_access_time,
            last_write_time: info.last_write_time,
            attributes: info.attributes,
            ads_names: self.ads.enumerate(local)?,
            link_target: decoded_link.map(|l| l.target),
        })
    }

    /// Open a file or `file:ads` path for reading.
    pub fn open(&self, path: &str) -> Result<Box<dyn ByteStream>> {
        let (base, ads) = paths::split_ads(path);
        let local = paths::normalize(&base);
        if local.is_empty() {
            return Err(MagpieError::InvalidArgument("empty file path".to_string()));
        }
        if !self.interpreter.file_exists(&local)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }
        let info = self.interpreter.file_info(&local)?;
        let is_sparse = info.attributes & attributes::SPARSE_FILE != 0;

        if let Some(name) = ads {
            return self.ads.open(&base, &name, is_sparse);
        }

        if info.attributes & attributes::REPARSE_POINT != 0 {
            if let Some(link) = self.links.link_target(&base)? {
                if self.links.policy_allows(&link) {
                    let resolved = self.links.resolve_target(&base)?;
                    let resolved_local = paths::normalize(&resolved);
                    if !resolved_local.eq_ignore_ascii_case(&local)
                        && self.interpreter.file_exists(&resolved_local)?
                    {
                        return self.open(&resolved);
                    }
                }
            }
        }

        if is_sparse {
            let dense = self.interpreter.open_file(&local)?;
            let stream = SparseStream::discover(self.interpreter.as_ref(), &local, dense)?;
            Ok(Box::new(stream))
        } else {
            self.interpreter.open_file(&local)
        }
    }

    /// Copy a file to the destination, streamed in `buffer_size` chunks.
    ///
    /// A `file:ads` source copies that one stream into the destination
    /// primary. A plain file source copies the primary and then every ADS
    /// under its own name. Returns the total bytes written.
    pub fn copy(
        &self,
        source: &str,
        dest: &str,
        overwrite: bool,
        destination: &mut dyn Destination,
    ) -> Result<u64> {
        // Refuse before touching the source.
        if destination.exists(dest) && !overwrite {
            return Err(MagpieError::AlreadyExists(dest.to_string()));
        }
        if let Some(parent) = host_parent(dest) {
            destination.create_dir_all(&parent)?;
        }

        let (base, ads) = paths::split_ads(source);
        if let Some(name) = ads {
            let info = self.interpreter.file_info(&paths::normalize(&base))?;
            let is_sparse = info.attributes & attributes::SPARSE_FILE != 0;
            let mut stream = self.ads.open(&base, &name, is_sparse)?;
            let mut sink = destination.create_stream(dest, None)?;
            let written = copy_stream(stream.as_mut(), sink.as_mut(), self.options.buffer_size)?;
            sink.flush()?;
            debug!("copied '{}' -> '{}' ({} bytes)", source, dest, written);
            return Ok(written);
        }

        let record = self.file_info(source, true)?;
        let mut written = {
            let mut stream = self.open(&record.full_path)?;
            let mut sink = destination.create_stream(dest, None)?;
            let n = copy_stream(stream.as_mut(), sink.as_mut(), self.options.buffer_size)?;
            sink.flush()?;
            n
        };

        for name in &record.ads_names {
            let mut stream = self.ads.open(&record.full_path, name, record.is_sparse())?;
            let mut sink = destination.create_stream(dest, Some(name))?;
            written += copy_stream(stream.as_mut(), sink.as_mut(), self.options.buffer_size)?;
            sink.flush()?;
        }

        destination.set_timestamps(
            dest,
            record.creation_time,
            record.last_write_time,
            record.last_access_time,
        )?;

        let portable = record.attributes
            & (attributes::READ_ONLY | attributes::HIDDEN | attributes::SYSTEM | attributes::ARCHIVE);
        if let Err(e) = destination.set_attributes(dest, portable) {
            warn!("'{}': attribute propagation failed: {}", dest, e);
        }

        debug!(
            "copied '{}' -> '{}' ({} bytes, {} alternate streams)",
            source,
            dest,
            written,
            record.ads_names.len()
        );
        Ok(written)
    }

    /// Same-directory siblings sharing size and creation time with `path`.
    /// A heuristic stand-in for MFT link counts, nothing more.
    pub fn hard_link_candidates(&self, path: &str) -> Result<Vec<String>> {
        let local = paths::normalize(path);
        if !self.interpreter.file_exists(&local)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }
        let info = self.interpreter.file_info(&local)?;
        let parent = paths::parent(&local);

        let mut out = Vec::new();
        for sibling in self.interpreter.list_files(&parent, "*")? {
            if sibling.eq_ignore_ascii_case(&local) {
                continue;
            }
            if let Ok(other) = self.interpreter.file_info(&sibling) {
                if other.size == info.size && other.creation_time == info.creation_time {
                    out.push(paths::display(&sibling, &self.drive_id));
                }
            }
        }
        Ok(out)
    }
}

/// Chunked stream-to-sink copy. Zero-byte reads inside sparse holes are
/// not end of stream; the cursor tells when the stream is drained.
fn copy_stream(
    source: &mut dyn ByteStream,
    sink: &mut dyn DestinationStream,
    buffer_size: usize,
) -> Result<u64> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buffer)?;
        if n == 0 {
            if source.position() >= source.len() {
                break;
            }
            continue;
        }
        sink.write_all(&buffer[..n])?;
        total += n as u64;
    }
    Ok(total)
}

fn host_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches(['\\', '/']);
    let cut = trimmed.rfind(['\\', '/'])?;
    let parent = &trimmed[..cut];
    if parent.is_empty() || paths::drive_prefix(parent).map(|d| d.len()) == Some(parent.len()) {
        return None;
    }
    Some(parent.to_string())
}
