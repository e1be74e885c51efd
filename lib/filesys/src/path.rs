//! Lexical path handling. Nothing here looks at a file system.

pub const SEPARATOR: char = '/';

pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// A trailing separator asks for the path to name a directory.
pub fn has_trailing_separator(path: &str) -> bool {
    path.len() > 1 && path.ends_with(SEPARATOR)
}

/// Return the shortest path equivalent to `path`, by purely lexical
/// processing:
///
/// * repeated separators collapse into one,
/// * `.` components are dropped,
/// * `..` removes the preceding normal component; at the start of an
///   absolute path it is dropped, at the start of a relative path it is kept,
/// * the trailing separator is removed, except for the root.
///
/// An empty result becomes `.`.
pub fn clean(path: &str) -> String {
    let absolute = is_absolute(path);
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            normal => parts.push(normal),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// Split after the last separator. The directory part keeps its trailing
/// separator; either part may be empty.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(index) => path.split_at(index + 1),
        None => ("", path),
    }
}

/// Whether `name` can be used as the leaf of a new entry.
pub(crate) fn is_entry_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
}
