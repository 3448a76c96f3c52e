/*!
Destination resolution and archive storage.

A destination is either a literal directory or a `host://` path. Host paths
are re-rooted under a single sandbox directory after `..` traversal has
been folded away, so no request can point outside the sandbox.
*/

pub mod local;

use std::path::{Path, PathBuf};

pub use local::{archive_file_name, LocalArchiveStore, ARCHIVE_PREFIX};

/// Scheme prefix of sandboxed host destinations.
pub const HOST_SCHEME: &str = "host://";

/// Map a host-relative path into `root`.
///
/// Empty and `.` segments are dropped and `..` pops the previous segment
/// without ever climbing above `root`. A path that cleans to nothing maps to
/// `root` itself.
///
/// Requests are always joined under `root`, even when they already name a
/// path inside it: with a root of `/tmp`, `host:///tmp/x` resolves to
/// `/tmp/tmp/x`. Deployments that configured `host:///tmp/...` destinations
/// against a `/tmp` root must drop the leading `tmp` segment to keep writing
/// to the same directory.
pub fn sandbox_path(root: &Path, requested: &str) -> PathBuf {
    let mut clean = PathBuf::new();
    for segment in requested.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                clean.pop();
            }
            segment => clean.push(segment),
        }
    }

    if clean.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Component;

    #[test]
    fn test_host_path_is_rerooted() {
        let root = Path::new("/tmp");
        assert_eq!(sandbox_path(root, "/var/backups"), PathBuf::from("/tmp/var/backups"));
        assert_eq!(sandbox_path(root, "/tmp/archives"), PathBuf::from("/tmp/tmp/archives"));
    }

    #[test]
    fn test_traversal_has_no_effect() {
        let root = Path::new("/srv/sandbox");
        assert_eq!(sandbox_path(root, "/../etc"), sandbox_path(root, "/etc"));
        assert_eq!(sandbox_path(root, "a/../../../../etc/passwd"), root.join("etc/passwd"));
    }

    #[test]
    fn test_empty_path_maps_to_root() {
        let root = Path::new("/srv/sandbox");
        for requested in ["", "/", "..", "/../..", "./."] {
            assert_eq!(sandbox_path(root, requested), root);
        }
    }

    proptest! {
        #[test]
        fn prop_resolved_path_stays_in_root(
            segments in prop::collection::vec(
                prop_oneof![Just("..".to_string()), Just(".".to_string()), Just(String::new()), "[a-z]{1,6}"],
                0..12,
            ),
        ) {
            let root = Path::new("/srv/sandbox");
            let requested = format!("/{}", segments.join("/"));
            let resolved = sandbox_path(root, &requested);

            prop_assert!(resolved.starts_with(root));
            prop_assert!(resolved.components().all(|c| c != Component::ParentDir));
        }
    }
}
