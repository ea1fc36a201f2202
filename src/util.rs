//! Small helpers shared across modules.

use std::path::PathBuf;

/// Resolve a configured directory, expanding a leading `~` from `$HOME`.
pub fn resolve_dir(path: &str) -> PathBuf {
    expand_home(path, std::env::var("HOME").ok().as_deref())
}

/// Expand a leading `~` against `home`.
///
/// - `"~"` → `home`
/// - `"~/foo"` → `home/foo`
/// - `"~user/foo"`, relative and absolute paths pass through unchanged, as
///   does everything when `home` is `None`.
fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => PathBuf::from(home),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            PathBuf::from(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_alone() {
        assert_eq!(expand_home("~", Some("/home/rx")), PathBuf::from("/home/rx"));
    }

    #[test]
    fn tilde_prefix() {
        assert_eq!(
            expand_home("~/receive_files", Some("/home/rx")),
            PathBuf::from("/home/rx/receive_files")
        );
    }

    #[test]
    fn other_paths_unchanged() {
        assert_eq!(
            expand_home("./receive_md5", Some("/home/rx")),
            PathBuf::from("./receive_md5")
        );
        assert_eq!(
            expand_home("~other/x", Some("/home/rx")),
            PathBuf::from("~other/x")
        );
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }
}
