// Path handling for volume-local and fully qualified NTFS paths.
//
// Volume-local form is what the interpreter consumes: backslash separated,
// no drive prefix, no leading or trailing separator, empty string for the
// volume root. Fully qualified form carries a `X:` drive prefix and is what
// records surface to the caller.

/// Separator used in all produced paths. Input accepts `/` as well.
pub const SEPARATOR: char = '\\';

/// Drive prefix (`X:`) of a path, if present.
pub fn drive_prefix(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && (bytes[0] as char).is_ascii_alphabetic() {
        Some(&path[..2])
    } else {
        None
    }
}

/// Reduce a path to volume-local form: unify separators, strip any drive
/// prefix and leading separator, collapse runs, drop a trailing separator.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('/', "\\");
    let without_drive = match drive_prefix(&unified) {
        Some(prefix) => &unified[prefix.len()..],
        None => unified.as_str(),
    };

    let mut out = String::with_capacity(without_drive.len());
    let mut last_was_sep = true; // swallows leading separators
    for c in without_drive.chars() {
        if c == SEPARATOR {
            if !last_was_sep {
                out.push(SEPARATOR);
            }
            last_was_sep = true;
        } else {
            out.push(c);
            last_was_sep = false;
        }
    }
    if out.ends_with(SEPARATOR) {
        out.pop();
    }
    out
}

/// Uppercased volume-local form, the key for case-insensitive path sets.
pub fn key(path: &str) -> String {
    normalize(path).to_uppercase()
}

/// Split a trailing `:ads` suffix off the last path component. The drive
/// colon of a fully qualified path is not an ADS separator.
pub fn split_ads(path: &str) -> (String, Option<String>) {
    let component_start = path
        .rfind(['\\', '/'])
        .map(|i| i + 1)
        .unwrap_or_else(|| drive_prefix(path).map(|p| p.len()).unwrap_or(0));

    match path[component_start..].find(':') {
        Some(i) => {
            let colon = component_start + i;
            (path[..colon].to_string(), Some(path[colon + 1..].to_string()))
        }
        None => (path.to_string(), None),
    }
}

/// Parent of a volume-local path; the root's parent is the root itself.
pub fn parent(path: &str) -> String {
    match path.rfind(SEPARATOR) {
        Some(i) => path[..i].to_string(),
        None => String::new(),
    }
}

/// Last component of a volume-local path.
pub fn file_name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Join a volume-local parent with a child component or subpath.
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{}{}{}", parent, SEPARATOR, child)
    }
}

/// Lexically resolve `.` and `..` components of a volume-local path.
/// `..` at the root stays at the root.
pub fn canonicalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let normalized = normalize(path);
    for component in normalized.split(SEPARATOR) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("\\")
}

/// Fully qualified display form of a caller-supplied path: the caller's
/// drive prefix is kept, a bare path gets `default_drive` prepended.
pub fn display(input: &str, default_drive: &str) -> String {
    let local = normalize(input);
    let drive = drive_prefix(input.trim_start()).unwrap_or(default_drive);
    if local.is_empty() {
        format!("{}{}", drive, SEPARATOR)
    } else {
        format!("{}{}{}", drive, SEPARATOR, local)
    }
}

/// Re-root a listed entry under the caller's display root. `entry` and
/// `listing_root` are volume-local, with `entry` inside `listing_root`.
pub fn rebase(entry: &str, listing_root: &str, display_root: &str) -> String {
    let relative = if listing_root.is_empty() {
        entry
    } else if entry.len() > listing_root.len()
        && entry[..listing_root.len()].eq_ignore_ascii_case(listing_root)
    {
        &entry[listing_root.len() + 1..]
    } else {
        entry
    };

    let root = display_root.trim_end_matches(['\\', '/']);
    if relative.is_empty() {
        root.to_string()
    } else {
        format!("{}{}{}", root, SEPARATOR, relative)
    }
}
