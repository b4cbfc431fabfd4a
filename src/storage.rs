//! Image storage collaborators.
//!
//! The capture workflow only needs to know where photos go, whether a name
//! is taken, and how to write or remove a file. Writes never overwrite an
//! existing file.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Directory new photos are written into. Must not block.
    fn resolve_output_location(&self) -> PathBuf;

    /// Whether something already occupies `destination`
    async fn exists(&self, destination: &Path) -> bool;

    /// Write a complete image to a new file at `destination`
    async fn write_image(&self, bytes: &[u8], destination: &Path) -> io::Result<()>;

    /// Remove a (possibly partial) image; missing files are not an error
    async fn discard(&self, destination: &Path) -> io::Result<()>;
}

/// Stores photos on the local file system.
///
/// [`prepare`](Self::prepare) picks the directory once: the primary directory
/// when it exists or can be created, otherwise the fallback directory.
#[derive(Debug, Clone)]
pub struct FileImageStorage {
    primary: PathBuf,
    fallback: Option<PathBuf>,
    location: PathBuf,
}

impl FileImageStorage {
    pub fn new<P: Into<PathBuf>>(primary: P) -> Self {
        let primary = primary.into();
        Self {
            location: primary.clone(),
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback<P: Into<PathBuf>>(mut self, fallback: P) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Create the capture directory, switching to the fallback if that fails
    pub async fn prepare(mut self) -> Self {
        self.location = match fs::create_dir_all(&self.primary).await {
            Ok(()) => {
                debug!("Using capture directory: {}", self.primary.display());
                self.primary.clone()
            }
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        "Could not create capture directory {} ({}), using {}",
                        self.primary.display(),
                        e,
                        fallback.display()
                    );
                    if let Err(e) = fs::create_dir_all(fallback).await {
                        warn!(
                            "Could not create fallback directory {}: {}",
                            fallback.display(),
                            e
                        );
                    }
                    fallback.clone()
                }
                None => {
                    warn!(
                        "Could not create capture directory {}: {}",
                        self.primary.display(),
                        e
                    );
                    self.primary.clone()
                }
            },
        };
        self
    }
}

#[async_trait]
impl ImageStorage for FileImageStorage {
    fn resolve_output_location(&self) -> PathBuf {
        self.location.clone()
    }

    async fn exists(&self, destination: &Path) -> bool {
        fs::try_exists(destination).await.unwrap_or(false)
    }

    async fn write_image(&self, bytes: &[u8], destination: &Path) -> io::Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        debug!("Wrote {} bytes to {}", bytes.len(), destination.display());
        Ok(())
    }

    async fn discard(&self, destination: &Path) -> io::Result<()> {
        match fs::remove_file(destination).await {
            Ok(()) => {
                debug!("Removed {}", destination.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory storage with failure injection, for simulations and tests
#[derive(Debug)]
pub struct MemoryImageStorage {
    root: PathBuf,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    fail_writes: Mutex<Option<String>>,
    hold_writes: AtomicBool,
    write_gate: Semaphore,
}

impl MemoryImageStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            files: Mutex::new(HashMap::new()),
            fail_writes: Mutex::new(None),
            hold_writes: AtomicBool::new(false),
            write_gate: Semaphore::new(0),
        }
    }

    /// Make subsequent writes leave half the bytes behind and then fail
    pub fn fail_writes(&self, reason: &str) {
        *self.fail_writes.lock() = Some(reason.to_string());
    }

    /// Keep `write_image` pending until [`release_write`](Self::release_write)
    pub fn hold_writes(&self) {
        self.hold_writes.store(true, Ordering::SeqCst);
    }

    pub fn release_write(&self) {
        self.write_gate.add_permits(1);
    }

    /// Put a file in place without going through `write_image`
    pub fn insert(&self, destination: &Path, bytes: &[u8]) {
        self.files
            .lock()
            .insert(destination.to_path_buf(), bytes.to_vec());
    }

    pub fn file(&self, destination: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(destination).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ImageStorage for MemoryImageStorage {
    fn resolve_output_location(&self) -> PathBuf {
        self.root.clone()
    }

    async fn exists(&self, destination: &Path) -> bool {
        self.files.lock().contains_key(destination)
    }

    async fn write_image(&self, bytes: &[u8], destination: &Path) -> io::Result<()> {
        if self.hold_writes.load(Ordering::SeqCst) {
            if let Ok(permit) = self.write_gate.acquire().await {
                permit.forget();
            }
        }

        let mut files = self.files.lock();
        if files.contains_key(destination) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", destination.display()),
            ));
        }

        if let Some(reason) = self.fail_writes.lock().clone() {
            files.insert(destination.to_path_buf(), bytes[..bytes.len() / 2].to_vec());
            return Err(io::Error::new(io::ErrorKind::Other, reason));
        }

        files.insert(destination.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn discard(&self, destination: &Path) -> io::Result<()> {
        self.files.lock().remove(destination);
        Ok(())
    }
}
