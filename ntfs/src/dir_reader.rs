// Per-directory operations: metadata, listing, recursive enumeration.
//
// Recursive listings are preorder: entries of a directory first, then each
// subdirectory in turn. Entries whose metadata cannot be read are skipped
// with a warning so one bad record cannot sink a sweep. If the listed root
// is itself a reparse point and policy allows, the listing runs against
// the resolved target while reported paths stay rooted under the caller's
// input.

use crate::file_reader::FileReader;
use crate::interpreter::NtfsInterpreter;
use crate::links::LinkResolver;
use crate::paths;
use log::warn;
use magpie_core::{attributes, AccessOptions, DirectoryRecord, FileRecord, MagpieError, Result};
use std::sync::Arc;

pub struct DirectoryReader {
    interpreter: Arc<dyn NtfsInterpreter>,
    files: FileReader,
    links: LinkResolver,
    drive_id: String,
}

impl DirectoryReader {
    pub fn new(interpreter: Arc<dyn NtfsInterpreter>, drive_id: &str, options: AccessOptions) -> Self {
        Self {
            files: FileReader::new(interpreter.clone(), drive_id, options.clone()),
            links: LinkResolver::new(interpreter.clone(), drive_id, options),
            interpreter,
            drive_id: drive_id.to_string(),
        }
    }

    /// Whether the directory exists. Interpreter failures read as absent.
    pub fn exists(&self, path: &str) -> bool {
        self.interpreter
            .dir_exists(&paths::normalize(path))
            .unwrap_or(false)
    }

    pub fn dir_info(&self, path: &str, resolve_links: bool) -> Result<DirectoryRecord> {
        let local = paths::normalize(path);
        let display = paths::display(path, &self.drive_id);
        self.dir_record_at(&local, &display, resolve_links)
    }

    fn dir_record_at(&self, local: &str, display: &str, resolve_links: bool) -> Result<DirectoryRecord> {
        if !self.interpreter.dir_exists(local)? {
            return Err(MagpieError::NotFound(display.to_string()));
        }
        let info = self.interpreter.dir_info(local)?;

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
                        && self.interpreter.dir_exists(&resolved_local)?
                    {
                        return self.dir_record_at(&resolved_local, &resolved, false);
                    }
                }
            }
        }

        Ok(DirectoryRecord {
            full_path: display.to_string(),
            creation_time: info.creation_time,
            last_access_time: info.last_access_time,
            last_write_time: info.last_write_time,
            attributes: info.attributes,
            link_target: decoded_link.map(|l| l.target),
        })
    }

    /// Files under `path` whose name matches `pattern`, preorder when
    /// recursing. Paths in the returned records stay rooted under the
    /// caller's `path`.
    pub fn list_files(
        &self,
        path: &str,
        pattern: &str,
        recurse: bool,
        resolve_links: bool,
    ) -> Result<Vec<FileRecord>> {
        let (listing_root, display_root) = self.listing_roots(path, resolve_links)?;
        let mut out = Vec::new();
        self.collect_files(&listing_root, &display_root, pattern, recurse, resolve_links, &mut out)?;
        Ok(out)
    }

    /// Directories under `path` matching `pattern`, preorder when
    /// recursing.
    pub fn list_dirs(
        &self,
        path: &str,
        pattern: &str,
        recurse: bool,
        resolve_links: bool,
    ) -> Result<Vec<DirectoryRecord>> {
        let (listing_root, display_root) = self.listing_roots(path, resolve_links)?;
        let mut out = Vec::new();
        self.collect_dirs(&listing_root, &display_root, pattern, recurse, resolve_links, &mut out)?;
        Ok(out)
    }

    /// Resolve the volume-local listing root (with the one-level reparse
    /// switch) and the caller-facing display root.
    fn listing_roots(&self, path: &str, resolve_links: bool) -> Result<(String, String)> {
        let local = paths::normalize(path);
        if !self.interpreter.dir_exists(&local)? {
            return Err(MagpieError::NotFound(path.to_string()));
        }
        let display_root = paths::display(path, &self.drive_id);

        if resolve_links {
            let info = self.interpreter.dir_info(&local)?;
            if info.attributes & attributes::REPARSE_POINT != 0 {
                if let Some(link) = self.links.link_target(path)? {
                    if self.links.policy_allows(&link) {
                        let resolved = self.links.resolve_target(path)?;
                        let resolved_local = paths::normalize(&resolved);
                        if self.interpreter.dir_exists(&resolved_local)? {
                            return Ok((resolved_local, display_root));
                        }
                    }
                }
            }
        }
        Ok((local, display_root))
    }

    fn collect_files(
        &self,
        dir: &str,
        display_dir: &str,
        pattern: &str,
        recurse: bool,
        resolve_links: bool,
        out: &mut Vec<FileRecord>,
    ) -> Result<()> {
        for entry in self.interpreter.list_files(dir, pattern)? {
            let display = paths::rebase(&entry, dir, display_dir);
            match self.files.record_at(&entry, &display, resolve_links) {
                Ok(record) => out.push(record),
                Err(e) => warn!("listing skips '{}': {}", display, e),
            }
        }

        if recurse {
            for subdir in self.interpreter.list_dirs(dir, "*")? {
                let display = paths::rebase(&subdir, dir, display_dir);
                if let Err(e) =
                    self.collect_files(&subdir, &display, pattern, recurse, resolve_links, out)
                {
                    warn!("listing skips subtree '{}': {}", display, e);
                }
            }
        }
        Ok(())
    }

    fn collect_dirs(
        &self,
        dir: &str,
        display_dir: &str,
        pattern: &str,
        recurse: bool,
        resolve_links: bool,
        out: &mut Vec<DirectoryRecord>,
    ) -> Result<()> {
        for entry in self.interpreter.list_dirs(dir, pattern)? {
            let display = paths::rebase(&entry, dir, display_dir);
            match self.dir_record_at(&entry, &display, resolve_links) {
                Ok(record) => out.push(record),
                Err(e) => warn!("listing skips '{}': {}", display, e),
            }
        }

        if recurse {
            for subdir in self.interpreter.list_dirs(dir, "*")? {
                let display = paths::rebase(&subdir, dir, display_dir);
                if let Err(e) =
                    self.collect_dirs(&subdir, &display, pattern, recurse, resolve_links, out)
                {
                    warn!("listing skips subtree '{}': {}", display, e);
                }
            }
        }
        Ok(())
    }
}
