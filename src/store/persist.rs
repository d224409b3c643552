// ABOUTME: Whole-collection JSON persistence for the stores, shared between processes.
// ABOUTME: Writes reload and rewrite under a lock file, then rename a temp file into place.

use super::error::{DeserializeSnafu, IoSnafu, SerializeSnafu, StoreError};
use super::lock::{FileLock, LOCK_WAIT};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The records of one store, optionally backed by a file other processes
/// may also be writing.
///
/// Reads reload the file so records written elsewhere are visible. Writes
/// take the file's lock, reload, apply the change, and persist it before the
/// new collection becomes visible here. A failed write leaves both disk and
/// memory unchanged.
#[derive(Debug)]
pub(crate) struct Collection<T> {
    what: &'static str,
    records: Mutex<Vec<T>>,
    file: Option<JsonFile>,
}

impl<T: Clone + Serialize + DeserializeOwned> Collection<T> {
    pub(crate) fn in_memory(what: &'static str) -> Self {
        Self {
            what,
            records: Mutex::new(Vec::new()),
            file: None,
        }
    }

    /// Back the collection with `path`, failing early if the file is corrupt.
    pub(crate) fn open(path: PathBuf, what: &'static str) -> Result<Self, StoreError> {
        let file = JsonFile::new(path);
        let records = file.load()?;
        tracing::debug!(
            path = %file.path().display(),
            count = records.len(),
            what,
            "loaded records"
        );
        Ok(Self {
            what,
            records: Mutex::new(records),
            file: Some(file),
        })
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let mut records = self.records.lock();
        if let Some(file) = &self.file {
            match file.load() {
                Ok(fresh) => *records = fresh,
                Err(e) => tracing::warn!(
                    path = %file.path().display(),
                    error = %e,
                    "reload failed, using last good copy"
                ),
            }
        }
        f(&records)
    }

    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut Vec<T>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut records = self.records.lock();
        let Some(file) = &self.file else {
            let mut next = records.clone();
            let out = f(&mut next)?;
            *records = next;
            return Ok(out);
        };

        let _lock = file.lock()?;
        let mut next = file.load()?;
        let out = f(&mut next)?;
        file.save(self.what, &next)?;
        *records = next;
        Ok(out)
    }
}

/// A JSON array of records kept in one file.
#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record; a missing file is an empty collection.
    pub(crate) fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(IoSnafu { path: &self.path }),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).context(DeserializeSnafu { path: &self.path })
    }

    /// Hold this file's lock until the guard drops.
    pub(crate) fn lock(&self) -> Result<FileLock, StoreError> {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        FileLock::acquire(Path::new(&name), LOCK_WAIT)
    }

    pub(crate) fn save<T: Serialize>(
        &self,
        what: &'static str,
        records: &[T],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records).context(SerializeSnafu { what })?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context(IoSnafu { path: dir })?;
        }

        let tmp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|source| {
            let _ = fs::remove_file(&tmp);
            StoreError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}
