//! Crash-safe file replacement.
//!
//! The new content goes to a temp file in the destination's directory and
//! is renamed over the destination on `commit`. A writer dropped before
//! `commit` (error, panic, early return) deletes its temp file and never
//! touches the destination, so a reader only ever sees the old or the new
//! file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Scoped writer that atomically replaces `dest` on commit.
#[derive(Debug)]
pub struct AtomicWriter {
    dest: PathBuf,
    temp: NamedTempFile,
}

impl AtomicWriter {
    /// Create the temp file next to `dest`.
    ///
    /// Same directory means same filesystem, which is what makes the final
    /// rename atomic.
    pub fn create(dest: &Path) -> io::Result<Self> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let temp = tempfile::Builder::new()
            .prefix(&format!("{name}-tmp-"))
            .tempfile_in(dir)?;

        match fs::metadata(dest) {
            Ok(meta) => fs::set_permissions(temp.path(), meta.permissions())?,
            Err(_) => default_permissions(temp.path())?,
        }

        Ok(Self {
            dest: dest.to_path_buf(),
            temp,
        })
    }

    /// Path of the temp file (for diagnostics and tests).
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Flush, fsync and rename the temp file over the destination.
    pub fn commit(mut self) -> io::Result<()> {
        self.temp.as_file_mut().flush()?;
        self.temp.as_file().sync_all()?;

        // On failure the returned handle still owns the temp file and
        // removes it when dropped.
        self.temp.persist(&self.dest).map_err(|e| e.error)?;

        sync_parent(&self.dest);
        Ok(())
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Write `contents` to `dest` atomically.
pub fn write_atomic(dest: &Path, contents: &[u8]) -> io::Result<()> {
    let mut writer = AtomicWriter::create(dest)?;
    writer.write_all(contents)?;
    writer.commit()
}

#[cfg(unix)]
fn default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // The proxy usually runs as another user and must be able to read it
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Best-effort fsync of the directory entry after a rename.
#[cfg(unix)]
fn sync_parent(dest: &Path) {
    let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_dest: &Path) {}
