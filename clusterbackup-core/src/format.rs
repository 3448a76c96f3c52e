/*!
Archive container formats.

A format packs a staging directory tree into a single stream and reads the
regular files back out of it. The default format is a gzip-compressed tar
stream; other containers can be plugged in behind the same trait.
*/

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{BackupError, Result};

/// Visitor invoked for each regular file read from an archive, with its
/// slash-separated path and contents.
pub type FileVisitor<'a> = dyn FnMut(&str, Vec<u8>) -> Result<()> + 'a;

/// Upper bound on the buffer reserved up front for one entry.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Container format abstraction
///
/// This trait lets the engine package and unpack archives without being
/// coupled to a specific container or compression algorithm.
pub trait ArchiveFormat {
    /// File extension without the leading dot, e.g. `tar.gz`
    fn extension(&self) -> &str;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;

    /// Stream every directory and regular file under `staging` into `output`.
    ///
    /// Entries are stored with paths relative to `staging`. Any I/O failure
    /// aborts packing.
    fn pack(&self, staging: &Path, output: &mut dyn Write) -> Result<()>;

    /// Call `visit` for each regular file in the archive, in stream order.
    fn for_each_file(&self, input: &mut dyn Read, visit: &mut FileVisitor<'_>) -> Result<()>;
}

/// Gzip-compressed tar container
#[derive(Debug, Clone)]
pub struct TarGzFormat {
    compression_level: Compression,
}

impl TarGzFormat {
    /// Create a format with the default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a format with the given compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }

    pub fn level(&self) -> u32 {
        self.compression_level.level()
    }
}

impl Default for TarGzFormat {
    fn default() -> Self {
        Self::new()
    }
}

fn append_tree<W: Write>(builder: &mut tar::Builder<W>, root: &Path, relative: &Path) -> Result<()> {
    let dir = root.join(relative);
    let entries = fs::read_dir(&dir).map_err(|e| {
        BackupError::archive(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    // Filesystem order; entries are addressed by path, not position.
    for entry in entries {
        let entry = entry?;
        let name = relative.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(&name, entry.path()).map_err(|e| {
                BackupError::archive(format!("Failed to add directory {}: {}", name.display(), e))
            })?;
            append_tree(builder, root, &name)?;
        } else if file_type.is_file() {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| {
                    BackupError::archive(format!("Failed to add file {}: {}", name.display(), e))
                })?;
        }
    }
    Ok(())
}

impl ArchiveFormat for TarGzFormat {
    fn extension(&self) -> &str {
        "tar.gz"
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }

    fn pack(&self, staging: &Path, output: &mut dyn Write) -> Result<()> {
        let encoder = GzEncoder::new(output, self.compression_level);
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        append_tree(&mut builder, staging, Path::new(""))?;

        let encoder = builder
            .into_inner()
            .map_err(|e| BackupError::archive(format!("Failed to finish tar stream: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| BackupError::archive(format!("Failed to finish compression: {}", e)))?;
        Ok(())
    }

    fn for_each_file(&self, input: &mut dyn Read, visit: &mut FileVisitor<'_>) -> Result<()> {
        let mut archive = tar::Archive::new(GzDecoder::new(input));
        let entries = archive
            .entries()
            .map_err(|e| BackupError::archive(format!("Failed to read archive: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| BackupError::archive(format!("Failed to read archive entry: {}", e)))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| BackupError::archive(format!("Invalid entry path: {}", e)))?
                .to_string_lossy()
                .replace('\\', "/");

            // The header size is untrusted; never pre-allocate from it unbounded.
            let declared = entry.size();
            let mut contents = Vec::with_capacity(declared.min(MAX_PREALLOCATION) as usize);
            entry.read_to_end(&mut contents).map_err(|e| {
                BackupError::archive(format!("Failed to read archive entry {}: {}", path, e))
            })?;
            if contents.len() as u64 != declared {
                return Err(BackupError::archive(format!(
                    "Archive entry {} is truncated: header declares {} bytes, found {}",
                    path,
                    declared,
                    contents.len()
                )));
            }
            visit(&path, contents)?;
        }
        Ok(())
    }
}
