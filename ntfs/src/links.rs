// Reparse link resolution.
//
// Junctions and symlinks are dereferenced iteratively until a non-reparse
// target, a policy refusal, or a failure. Cycle and depth bookkeeping is
// per call; nothing leaks between resolutions.

use crate::interpreter::NtfsInterpreter;
use crate::paths;
use crate::reparse::{parse_reparse_buffer, HeaderLayout, ReparseKind};
use log::debug;
use magpie_core::{attributes, AccessOptions, MagpieError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// What a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    Junction,
    SymbolicFile,
    SymbolicDirectory,
    /// Best-effort sibling match, never produced by reparse decoding.
    HardLink,
}

/// A single decoded and post-processed link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkTarget {
    pub kind: LinkKind,
    /// Target after NT namespace stripping and separator normalization,
    /// drive-prefixed when absolute.
    pub target: String,
    /// Substitute name exactly as decoded from the reparse buffer.
    pub raw_target: String,
    pub is_relative: bool,
    /// Set when the target leaves this volume; resolution stops there.
    pub crosses_volume: bool,
    pub layout: HeaderLayout,
}

pub struct LinkResolver {
    interpreter: Arc<dyn NtfsInterpreter>,
    drive_id: String,
    options: AccessOptions,
}

impl LinkResolver {
    pub fn new(interpreter: Arc<dyn NtfsInterpreter>, drive_id: &str, options: AccessOptions) -> Self {
        Self { interpreter, drive_id: drive_id.to_string(), options }
    }

    /// Decode the link at `path`. `Ok(None)` when the path exists but is
    /// not a reparse point.
    pub fn link_target(&self, path: &str) -> Result<Option<LinkTarget>> {
        let local = paths::normalize(path);

        let (attrs, is_directory) = if self.interpreter.file_exists(&local)? {
            (self.interpreter.file_info(&local)?.attributes, false)
        } else if self.interpreter.dir_exists(&local)? {
            (self.interpreter.dir_info(&local)?.attributes, true)
        } else {
            return Err(MagpieError::NotFound(path.to_string()));
        };

        if attrs & attributes::REPARSE_POINT == 0 {
            return Ok(None);
        }

        let buffer = self.interpreter.reparse_point(&local)?;
        let parsed = parse_reparse_buffer(&buffer)?;

        let (kind, is_relative) = match parsed.kind {
            ReparseKind::MountPoint => (LinkKind::Junction, false),
            ReparseKind::Symlink { is_relative } => {
                let kind = if is_directory { LinkKind::SymbolicDirectory } else { LinkKind::SymbolicFile };
                (kind, is_relative)
            }
        };

        let (target, crosses_volume) = self.postprocess_target(&parsed.substitute_name, is_relative);
        debug!(
            "link '{}': {:?} -> '{}' (relative: {}, cross-volume: {}, layout {:?})",
            path, kind, target, is_relative, crosses_volume, parsed.layout
        );

        Ok(Some(LinkTarget {
            kind,
            target,
            raw_target: parsed.substitute_name,
            is_relative,
            crosses_volume,
            layout: parsed.layout,
        }))
    }

    /// Follow links from `path` until a non-reparse target, a policy halt,
    /// or a failure. Returns a fully qualified path except when a refused
    /// relative target is surfaced as-is.
    pub fn resolve_target(&self, path: &str) -> Result<String> {
        let mut current = path.to_string();
        let mut visited: HashSet<String> = HashSet::new();
        let mut depth = 0u32;

        loop {
            if !visited.insert(paths::key(&current)) {
                return Err(MagpieError::LinkRecursion { path: current, depth });
            }

            let link = match self.link_target(&current)? {
                Some(link) => link,
                None => return Ok(current),
            };

            if link.crosses_volume {
                debug!("link '{}' leaves the volume, surfacing raw target", current);
                return Ok(link.target);
            }
            if link.is_relative && !self.options.follow_relative_links {
                return Ok(link.target);
            }
            if !link.is_relative && !self.options.follow_absolute_links {
                return Ok(link.target);
            }

            depth += 1;
            if depth > self.options.max_link_depth {
                return Err(MagpieError::LinkRecursion {
                    path: current,
                    depth: self.options.max_link_depth,
                });
            }

            let next = self.compose_candidate(&current, &link);
            let next_local = paths::normalize(&next);
            let exists = self.interpreter.file_exists(&next_local)?
                || self.interpreter.dir_exists(&next_local)?;
            if !exists {
                debug!("link target '{}' absent, resolution stops there", next);
                return Ok(next);
            }
            current = next;
        }
    }

    /// Whether options permit dereferencing this link.
    pub fn policy_allows(&self, link: &LinkTarget) -> bool {
        if link.crosses_volume {
            return false;
        }
        if link.is_relative {
            self.options.follow_relative_links
        } else {
            self.options.follow_absolute_links
        }
    }

    fn compose_candidate(&self, link_path: &str, link: &LinkTarget) -> String {
        if link.is_relative {
            let parent = paths::parent(&paths::normalize(link_path));
            let composed = paths::canonicalize(&paths::join(&parent, &link.target));
            paths::display(&composed, &self.drive_id)
        } else {
            link.target.clone()
        }
    }

    /// Strip the NT device namespace, recognize same-volume GUID targets,
    /// and normalize separators. Returns the target and whether it leaves
    /// this volume.
    fn postprocess_target(&self, raw: &str, is_relative: bool) -> (String, bool) {
        let name = raw.replace('/', "\\");

        if let Some(rest) = name.strip_prefix("\\??\\") {
            if let Some(tail) = rest.strip_prefix("Volume{") {
                let Some(end) = tail.find('}') else {
                    return (raw.to_string(), true);
                };
                let guid = &tail[..end];
                let trailing = &tail[end + 1..];
                return match self.interpreter.volume_guid() {
                    Some(own) if own.eq_ignore_ascii_case(guid) => {
                        (format!("{}{}", self.drive_id, trailing), false)
                    }
                    _ => (raw.to_string(), true),
                };
            }
            let crosses = paths::drive_prefix(rest)
                .map(|d| !d.eq_ignore_ascii_case(&self.drive_id))
                .unwrap_or(false);
            return (rest.to_string(), crosses);
        }

        if !is_relative {
            if let Some(drive) = paths::drive_prefix(&name) {
                return (name.clone(), !drive.eq_ignore_ascii_case(&self.drive_id));
            }
        }
        (name, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockVolume;
    use magpie_core::AccessOptions;

    fn follow_all() -> AccessOptions {
        AccessOptions {
            follow_absolute_links: true,
            follow_relative_links: true,
            ..AccessOptions::default()
        }
    }

    fn resolver(volume: MockVolume, options: AccessOptions) -> LinkResolver {
        LinkResolver::new(Arc::new(volume), "C:", options)
    }

    #[test]
    fn test_plain_file_is_not_a_link() {
        let volume = MockVolume::new(4096).with_file("notes.txt", b"hi".to_vec());
        let resolver = resolver(volume, follow_all());

        assert!(resolver.link_target("C:\\notes.txt").unwrap().is_none());
        assert_eq!(resolver.resolve_target("C:\\notes.txt").unwrap(), "C:\\notes.txt");
    }

    #[test]
    fn test_junction_resolves_when_policy_allows() {
        let volume = MockVolume::new(4096)
            .with_dir("Users")
            .with_junction("Documents and Settings", "\\??\\C:\\Users");
        let resolver = resolver(volume, follow_all());

        let target = resolver.link_target("C:\\Documents and Settings").unwrap().unwrap();
        assert_eq!(target.kind, LinkKind::Junction);
        assert_eq!(target.target, "C:\\Users");
        assert!(!target.is_relative);

        assert_eq!(
            resolver.resolve_target("C:\\Documents and Settings").unwrap(),
            "C:\\Users"
        );
    }

    #[test]
    fn test_absolute_policy_refusal_surfaces_target() {
        let volume = MockVolume::new(4096)
            .with_dir("Users")
            .with_junction("Documents and Settings", "\\??\\C:\\Users");
        let resolver = resolver(volume, AccessOptions::default()); // absolute follows off

        assert_eq!(
            resolver.resolve_target("C:\\Documents and Settings").unwrap(),
            "C:\\Users"
        );
    }

    #[test]
    fn test_relative_symlink_composition() {
        let volume = MockVolume::new(4096)
            .with_file("app\\current\\readme.md", b"doc".to_vec())
            .with_symlink("app\\link.md", "current\\readme.md", true);
        let resolver = resolver(volume, follow_all());

        assert_eq!(
            resolver.resolve_target("C:\\app\\link.md").unwrap(),
            "C:\\app\\current\\readme.md"
        );
    }

    #[test]
    fn test_relative_policy_refusal_returns_raw() {
        let volume = MockVolume::new(4096)
            .with_file("app\\current\\readme.md", b"doc".to_vec())
            .with_symlink("app\\link.md", "current\\readme.md", true);
        let options = AccessOptions { follow_relative_links: false, ..AccessOptions::default() };
        let resolver = resolver(volume, options);

        assert_eq!(
            resolver.resolve_target("C:\\app\\link.md").unwrap(),
            "current\\readme.md"
        );
    }

    #[test]
    fn test_missing_target_terminates_resolution() {
        let volume = MockVolume::new(4096).with_junction("gone", "\\??\\C:\\NoSuchDir");
        let resolver = resolver(volume, follow_all());

        assert_eq!(resolver.resolve_target("C:\\gone").unwrap(), "C:\\NoSuchDir");
    }

    #[test]
    fn test_cycle_detection() {
        let volume = MockVolume::new(4096)
            .with_junction("a", "\\??\\C:\\b")
            .with_junction("b", "\\??\\C:\\a");
        let resolver = resolver(volume, follow_all());

        let err = resolver.resolve_target("C:\\a").unwrap_err();
        match err {
            MagpieError::LinkRecursion { path, depth } => {
                assert!(depth >= 2);
                let local = paths::key(&path);
                assert!(local == "A" || local == "B");
            }
            other => panic!("expected LinkRecursion, got {:?}", other),
        }
    }

    #[test]
    fn test_depth_cap() {
        let mut volume = MockVolume::new(4096).with_dir("end");
        for i in 0..11 {
            let target = if i == 10 { "\\??\\C:\\end".to_string() } else { format!("\\??\\C:\\link{}", i + 1) };
            volume = volume.with_junction(&format!("link{}", i), &target);
        }
        let resolver = resolver(volume, follow_all());

        let err = resolver.resolve_target("C:\\link0").unwrap_err();
        assert!(matches!(err, MagpieError::LinkRecursion { depth: 10, .. }));
    }

    #[test]
    fn test_same_volume_guid_target() {
        let volume = MockVolume::new(4096)
            .with_volume_guid("12345678-aaaa-bbbb-cccc-1234567890ab")
            .with_dir("Mounted")
            .with_junction(
                "vol",
                "\\??\\Volume{12345678-AAAA-BBBB-CCCC-1234567890AB}\\Mounted",
            );
        let resolver = resolver(volume, follow_all());

        assert_eq!(resolver.resolve_target("C:\\vol").unwrap(), "C:\\Mounted");
    }

    #[test]
    fn test_foreign_volume_guid_is_terminal() {
        let volume = MockVolume::new(4096)
            .with_volume_guid("12345678-aaaa-bbbb-cccc-1234567890ab")
            .with_junction("vol", "\\??\\Volume{99999999-0000-0000-0000-000000000000}\\Data");
        let resolver = resolver(volume, follow_all());

        assert_eq!(
            resolver.resolve_target("C:\\vol").unwrap(),
            "\\??\\Volume{99999999-0000-0000-0000-000000000000}\\Data"
        );
    }

    #[test]
    fn test_other_drive_letter_is_terminal() {
        let volume = MockVolume::new(4096).with_junction("d-data", "\\??\\D:\\Data");
        let resolver = resolver(volume, follow_all());

        assert_eq!(resolver.resolve_target("C:\\d-data").unwrap(), "D:\\Data");
    }
}
