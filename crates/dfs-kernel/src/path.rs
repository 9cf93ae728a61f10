//! Path normalization.
//!
//! Turns a caller-supplied path into a canonical absolute path: leading `/`,
//! no `.` or `..` segments, no repeated separators, no trailing separator
//! (except the root itself). Pure string work; the caller decides which
//! working directory a relative path is resolved against.

use dfs_types::{DfsError, DfsResult};

/// Normalize `path` against `directory`.
///
/// `directory` is only consulted when `path` is relative and is expected to
/// be canonical already. A `..` that would climb above `/` is an error, not
/// a clamp: it means the caller built a malformed traversal.
pub fn normalize(directory: &str, path: &str) -> DfsResult<String> {
    if path.is_empty() {
        return Err(DfsError::invalid("empty path"));
    }

    let absolute = path.starts_with('/');
    let worst_case = if absolute {
        path.len()
    } else {
        directory.len() + path.len() + 1
    };

    // One allocation for the whole scan; segments are written in place and
    // `..` truncates back to the previous separator.
    let mut out = String::new();
    out.try_reserve_exact(worst_case.max(1))
        .map_err(|_| DfsError::OutOfMemory)?;

    let base = if absolute { "" } else { directory };
    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                let Some(cut) = out.rfind('/') else {
                    return Err(DfsError::invalid(format!("path escapes root: {path}")));
                };
                out.truncate(cut);
            }
            name => {
                out.push('/');
                out.push_str(name);
            }
        }
    }

    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// True if `mount` owns `path`: an exact match, or a prefix ending on a
/// separator boundary. Both must be canonical.
pub fn is_under(mount: &str, path: &str) -> bool {
    if mount == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(mount) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The part of canonical `path` below canonical `mount`, without a leading
/// separator. `None` when the two are the same path.
pub fn subdir<'a>(mount: &str, path: &'a str) -> Option<&'a str> {
    if mount.len() >= path.len() {
        return None;
    }
    let rest = &path[mount.len()..];
    Some(rest.trim_start_matches('/'))
}

/// Final component of a path, as used for device-style opens.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
