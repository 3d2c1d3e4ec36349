use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use tempfile::{Builder, TempPath};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::{IoContext, Result};

/// Create the temporary sibling used while replacing `path`
///
/// The file is created exclusively under a unique name
/// (`.<name>.<random>.tmp`), so it never opens an existing file, including
/// a secret that happens to be called `<name>.tmp`. It starts out owner-only
/// and `mode` is applied before any content is written. The returned
/// [`TempPath`] removes the file when dropped unless it is published.
fn create_temp(path: &Path, mode: Option<u32>) -> Result<(File, TempPath)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (file, temp_path) = Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .fs_context(|| format!("Unable to create temporary file for {}", path.display()))?
        .into_parts();

    if let Some(mode) = mode {
        set_file_permissions(&temp_path, mode)?;
    }

    Ok((file, temp_path))
}

/// Atomically replace the content of a file
///
/// This function writes to a temporary file in the same directory,
/// syncs to disk, then renames to the target path. A reader of `path`
/// sees either the old or the new content, never a mix of both.
/// The parent directory must already exist.
pub fn atomic_write(path: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    let (mut file, temp_path) = create_temp(path, mode)?;

    file.write_all(content)
        .fs_context(|| format!("Unable to write {}", temp_path.display()))?;

    file.sync_all()
        .fs_context(|| format!("Unable to sync {}", temp_path.display()))?;
    drop(file);

    publish(temp_path, path)
}

/// Atomically replace the content of a file with everything read from `reader`
///
/// The reader is drained completely before anything becomes visible at
/// `path`. When `modified` is given it becomes the file's mtime; it is
/// applied to the temporary file before the rename so content and timestamp
/// are published together. Returns the number of bytes written.
///
/// Errors returned by `reader` come back as [`SyncError::Filesystem`] with
/// the reader's `io::Error` as source, unchanged.
///
/// [`SyncError::Filesystem`]: crate::error::SyncError::Filesystem
pub async fn atomic_write_stream<R>(
    path: &Path,
    mut reader: R,
    modified: Option<SystemTime>,
    mode: Option<u32>,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let (file, temp_path) = create_temp(path, mode)?;
    let mut file = tokio::fs::File::from_std(file);

    let written = tokio::io::copy(&mut reader, &mut file)
        .await
        .fs_context(|| format!("Unable to copy content to {}", temp_path.display()))?;
    drop(reader);

    file.flush()
        .await
        .fs_context(|| format!("Unable to flush {}", temp_path.display()))?;
    file.sync_all()
        .await
        .fs_context(|| format!("Unable to sync {}", temp_path.display()))?;

    if let Some(modified) = modified {
        let file = file.into_std().await;
        file.set_modified(modified)
            .fs_context(|| format!("Unable to set modified time {}", temp_path.display()))?;
    }

    publish(temp_path, path)?;
    Ok(written)
}

/// Rename the finished temporary file over its destination
///
/// On failure the temporary file is removed.
fn publish(temp_path: TempPath, path: &Path) -> Result<()> {
    let from = temp_path.to_path_buf();
    temp_path.persist(path).map_err(|e| e.error).fs_context(|| {
        format!("Unable to rename {} to {}", from.display(), path.display())
    })
}

/// Modification time of `path`, or `None` if it doesn't exist
pub fn modified_time(path: &Path) -> Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(metadata) => metadata
            .modified()
            .map(Some)
            .fs_context(|| format!("Unable to read modified time of {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).fs_context(|| format!("Unable to stat {}", path.display())),
    }
}

/// Set file permissions to a specific mode (Unix only, no-op elsewhere)
pub fn set_file_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .fs_context(|| format!("Unable to set permissions for {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}
