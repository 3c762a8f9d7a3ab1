use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use odb_types::Scheme;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{BackendError, BackendResult};
use crate::traits::{Backend, Capabilities, ObjectWriter, PathIter, Stat, TempObject, TEMP_SUFFIX};

/// Local-disk backend. Paths are filesystem paths.
///
/// Temp files are created with `tempfile` in the target directory and kept
/// on disk until renamed, so `rename` is a same-filesystem move.
#[derive(Clone, Debug, Default)]
pub struct LocalBackend {
    _private: (),
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_parent(path: &str) -> BackendResult<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| BackendError::from_io(path, e))?;
        }
    }
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows.
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(18)
    }
    #[cfg(windows)]
    {
        err.raw_os_error() == Some(17)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

struct LocalWriter {
    path: String,
    writer: BufWriter<File>,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl ObjectWriter for LocalWriter {
    fn finish(self: Box<Self>) -> BackendResult<()> {
        let LocalWriter { path, writer } = *self;
        let file = writer
            .into_inner()
            .map_err(|e| BackendError::from_io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| BackendError::from_io(&path, e))
    }
}

impl LocalBackend {
    fn fill(&self, src: &str, mut writer: Box<dyn ObjectWriter>) -> BackendResult<()> {
        let mut reader = self.open_read(src)?;
        io::copy(&mut reader, &mut writer).map_err(|e| BackendError::from_io(src, e))?;
        writer.finish()
    }
}

impl Backend for LocalBackend {
    fn scheme(&self) -> Scheme {
        Scheme::Local
    }

    fn capabilities(&self) -> Capabilities {
        // Per-file stat is cheap on a local disk; full traversal never wins.
        Capabilities {
            atomic_rename: true,
            can_traverse: false,
        }
    }

    fn open_read(&self, path: &str) -> BackendResult<Box<dyn Read + Send>> {
        let file = File::open(path).map_err(|e| BackendError::from_io(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_write_temp(&self, dir: &str) -> BackendResult<TempObject> {
        fs::create_dir_all(dir).map_err(|e| BackendError::from_io(dir, e))?;
        let named = tempfile::Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| BackendError::from_io(dir, e))?;
        let (file, temp_path) = named.keep().map_err(|e| BackendError::from_io(dir, e.error))?;
        let path = temp_path.to_string_lossy().into_owned();
        trace!(path = %path, "created temp file");
        Ok(TempObject {
            path: path.clone(),
            writer: Box::new(LocalWriter {
                path,
                writer: BufWriter::new(file),
            }),
        })
    }

    fn list(&self, prefix: &str) -> BackendResult<PathIter<'_>> {
        if !Path::new(prefix).exists() {
            return Ok(Box::new(std::iter::empty()));
        }
        let iter = WalkDir::new(prefix).into_iter().filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_file() => match e.path().to_str() {
                Some(p) => Some(Ok(p.to_string())),
                None => {
                    debug!(path = ?e.path(), "skipping non UTF-8 path");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                let path = e.path().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
                match e.into_io_error() {
                    // Entries may vanish between readdir and stat.
                    Some(io) if io.kind() == io::ErrorKind::NotFound => None,
                    Some(io) => Some(Err(BackendError::from_io(&path, io))),
                    None => Some(Err(BackendError::Io {
                        path,
                        source: io::Error::new(io::ErrorKind::Other, "filesystem loop"),
                    })),
                }
            }
        });
        Ok(Box::new(iter))
    }

    fn stat(&self, path: &str) -> BackendResult<Stat> {
        let meta = fs::metadata(path).map_err(|e| BackendError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(BackendError::NotFound(path.to_string()));
        }
        Ok(Stat {
            size: meta.len(),
            checksum: None,
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn copy(&self, src: &str, dst: &str) -> BackendResult<()> {
        ensure_parent(dst)?;
        let dir = Path::new(dst)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let TempObject { path: temp_path, writer } = self.open_write_temp(&dir)?;
        let result = self
            .fill(src, writer)
            .and_then(|()| fs::rename(&temp_path, dst).map_err(|e| BackendError::from_io(dst, e)));
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        ensure_parent(to)?;
        fs::rename(from, to).map_err(|e| {
            if is_cross_device(&e) {
                BackendError::CrossDevice {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            } else {
                BackendError::from_io(from, e)
            }
        })
    }

    fn delete(&self, path: &str) -> BackendResult<()> {
        fs::remove_file(path).map_err(|e| BackendError::from_io(path, e))
    }

    fn exists(&self, path: &str) -> BackendResult<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::from_io(path, e)),
        }
    }
}
