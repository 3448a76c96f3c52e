/*!
Archive entry path grammar.

Every captured object lives at a path that doubles as its identity:

```text
cluster/[<group>/]<version>/<resource>/<name>.json
namespaces/<namespace>/[<group>/]<version>/<resource>/<name>.json
```

The core API group is empty and its segment is omitted, so two directory
segments after the scope prefix mean the core group and three mean a named
group.
*/

use std::fmt;

use crate::cluster::GroupVersionResource;
use crate::{BackupError, Result};

pub const CLUSTER_PREFIX: &str = "cluster";
pub const NAMESPACES_PREFIX: &str = "namespaces";
pub const ENTRY_SUFFIX: &str = ".json";

/// The identity of one object stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveEntry {
    pub gvr: GroupVersionResource,
    /// `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    pub name: String,
}

impl ArchiveEntry {
    pub fn new<N: Into<String>>(gvr: GroupVersionResource, namespace: Option<&str>, name: N) -> Self {
        Self {
            gvr,
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }

    /// Slash-separated path of this entry relative to the archive root.
    pub fn path(&self) -> String {
        let mut segments: Vec<&str> = Vec::with_capacity(7);
        match &self.namespace {
            Some(ns) => {
                segments.push(NAMESPACES_PREFIX);
                segments.push(ns);
            }
            None => segments.push(CLUSTER_PREFIX),
        }
        if !self.gvr.group.is_empty() {
            segments.push(&self.gvr.group);
        }
        segments.push(&self.gvr.version);
        segments.push(&self.gvr.resource);
        format!("{}/{}{}", segments.join("/"), self.name, ENTRY_SUFFIX)
    }

    /// Parse an archive path back into an entry.
    ///
    /// A leading `./` is ignored. The file name may be `.json` alone, in
    /// which case the entry name is empty and must be recovered from the
    /// object body.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.strip_prefix("./").unwrap_or(path);
        let Some(stem) = trimmed.strip_suffix(ENTRY_SUFFIX) else {
            return Err(BackupError::malformed(path, "not a .json entry"));
        };

        let segments: Vec<&str> = stem.split('/').collect();
        if let Some(bad) = segments[..segments.len() - 1]
            .iter()
            .find(|segment| segment.is_empty() || **segment == "." || **segment == "..")
        {
            return Err(BackupError::malformed(
                path,
                format!("invalid path segment {bad:?}"),
            ));
        }

        let (namespace, rest) = match segments.split_first() {
            Some((&CLUSTER_PREFIX, rest)) => (None, rest),
            Some((&NAMESPACES_PREFIX, rest)) => match rest.split_first() {
                Some((ns, rest)) => (Some(*ns), rest),
                None => return Err(BackupError::malformed(path, "missing namespace segment")),
            },
            _ => {
                return Err(BackupError::malformed(
                    path,
                    "expected a cluster/ or namespaces/ prefix",
                ))
            }
        };

        let gvr = match rest {
            [version, resource, _] => GroupVersionResource::new("", *version, *resource),
            [group, version, resource, _] => GroupVersionResource::new(*group, *version, *resource),
            _ => {
                return Err(BackupError::malformed(
                    path,
                    format!(
                        "expected 2 or 3 segments before the file name, found {}",
                        rest.len().saturating_sub(1)
                    ),
                ))
            }
        };

        let name = rest.last().copied().unwrap_or_default();
        if name == "." || name == ".." {
            return Err(BackupError::malformed(path, "invalid object name"));
        }

        Ok(Self::new(gvr, namespace, name))
    }
}

impl fmt::Display for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
