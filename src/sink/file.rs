use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use super::{
    Destination,
    error::{SinkError, SinkResult},
};

/// Append-only file that rotates between batches.
///
/// Once the current file has reached `rotate_size` bytes or has been open for
/// `rotate_interval`, the next batch first renames it to `<path>.<n>` (the lowest unused `n`)
/// and reopens `path`. A batch is never split across two files.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    /// Bytes in the current file, including what was there when it was opened.
    size: u64,
    opened_at: Instant,
    rotate_size: Option<u64>,
    rotate_interval: Option<Duration>,
    next_archive: u64,
}

impl RotatingFile {
    /// Open `path` for appending, creating it and its parent directories if needed.
    pub fn open(
        path: impl Into<PathBuf>,
        rotate_size: Option<u64>,
        rotate_interval: Option<Duration>,
    ) -> SinkResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;
        }
        let (file, size) = open_append(&path)?;

        tracing::debug!(path = ?path, size, "Opened event output file");

        Ok(Self {
            path,
            file,
            size,
            opened_at: Instant::now(),
            rotate_size,
            rotate_interval,
            next_archive: 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the current file.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn needs_rotation(&self) -> bool {
        if self.size == 0 {
            return false;
        }
        self.rotate_size.is_some_and(|limit| self.size >= limit)
            || self
                .rotate_interval
                .is_some_and(|interval| self.opened_at.elapsed() >= interval)
    }

    fn rotate(&mut self) -> SinkResult<PathBuf> {
        let archive = loop {
            let candidate = suffixed(&self.path, self.next_archive);
            self.next_archive += 1;
            if !candidate.exists() {
                break candidate;
            }
        };

        fs::rename(&self.path, &archive).map_err(|source| SinkError::Rotate {
            path: self.path.clone(),
            source,
        })?;
        let (file, size) = open_append(&self.path)?;
        self.file = file;
        self.size = size;
        self.opened_at = Instant::now();

        Ok(archive)
    }
}

impl Destination for RotatingFile {
    fn write_batch(&mut self, batch: &[u8]) -> SinkResult<bool> {
        let mut rotated = false;
        if self.needs_rotation() {
            match self.rotate() {
                Ok(archive) => {
                    tracing::info!(path = ?self.path, archive = ?archive, "Rotated event output file");
                    rotated = true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rotation failed, continuing with current file");
                }
            }
        }

        self.file.write_all(batch).map_err(|source| SinkError::Write {
            target: self.path.display().to_string(),
            source,
        })?;
        self.size += batch.len() as u64;
        Ok(rotated)
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.file.flush().map_err(|source| SinkError::Write {
            target: self.path.display().to_string(),
            source,
        })
    }
}

fn open_append(path: &Path) -> SinkResult<(File, u64)> {
    let open_err = |source: std::io::Error| SinkError::Open {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_err)?;
    let size = file.metadata().map_err(open_err)?.len();
    Ok((file, size))
}

/// `path` with `.<n>` appended to its file name.
pub(crate) fn suffixed(path: &Path, n: impl std::fmt::Display) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{n}"));
    PathBuf::from(name)
}
