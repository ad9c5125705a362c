use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::debug;
use uuid::Uuid;

use crate::config::DISAMBIGUATOR_LEN;
use crate::sanitize::disambiguate_file_name;

/// Filesystem-backed store rooted at a fixed directory. Every folder path
/// a caller supplies is confined beneath the root; the filesystem itself
/// is the source of truth for existence and uniqueness.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    dir_mode: u32,
    file_mode: u32,
}

/// Result of a completed write: the final unique name plus the normalized
/// folder the file landed in.
#[derive(Debug)]
pub struct StoredFile {
    pub name: String,
    pub folder: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

impl Storage {
    pub fn new(root: PathBuf, dir_mode: u32, file_mode: u32) -> Self {
        Self {
            root,
            dir_mode,
            file_mode,
        }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        apply_mode(&self.root, self.dir_mode).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Persist `bytes` under `folder`, preferring `candidate` as the name.
    /// Existing files are never overwritten: a taken name gets a random
    /// disambiguator, and the write itself claims the final name with
    /// `create_new`, so even a racing identical upload cannot clobber it.
    pub async fn store(
        &self,
        folder: &str,
        candidate: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let (dir, folder) = self.resolve_folder(folder)?;
        self.reject_symlink_components(&dir, true).await?;
        // Concurrent creation of the same folder is fine.
        fs::create_dir_all(&dir).await?;
        apply_mode(&dir, self.dir_mode).await?;

        let name = self.unique_name(&dir, candidate).await?;
        let target = dir.join(&name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await?;
        let written: io::Result<()> = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            // Leave no partial file behind.
            drop(file);
            let _ = fs::remove_file(&target).await;
            return Err(StorageError::Io(err));
        }
        drop(file);
        apply_mode(&target, self.file_mode).await?;

        debug!(folder, name, size = bytes.len(), "file stored");
        Ok(StoredFile { name, folder })
    }

    /// Remove `folder/name`. A target that is missing, or not a regular
    /// file, reports [`DeleteOutcome::AlreadyAbsent`] rather than an error
    /// so callers can retry deletes safely.
    pub async fn remove(&self, folder: &str, name: &str) -> Result<DeleteOutcome, StorageError> {
        validate_file_name(name)?;
        let (dir, _) = self.resolve_folder(folder)?;
        let target = dir.join(name);
        self.reject_symlink_components(&target, true).await?;

        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_file() => {
                fs::remove_file(&target).await?;
                debug!(name, "file removed");
                Ok(DeleteOutcome::Deleted)
            }
            Ok(_) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// One existence check, at most one disambiguation attempt. A race
    /// lost after the check surfaces as `AlreadyExists` from the writer
    /// instead of an overwrite.
    async fn unique_name(&self, dir: &Path, candidate: &str) -> io::Result<String> {
        if !fs::try_exists(dir.join(candidate)).await? {
            return Ok(candidate.to_string());
        }
        let token = Uuid::new_v4().simple().to_string();
        let renamed = disambiguate_file_name(candidate, &token[..DISAMBIGUATOR_LEN]);
        debug!(candidate, renamed, "name collision, disambiguated");
        Ok(renamed)
    }

    /// Normalize a caller-supplied folder path into an absolute directory
    /// under the root plus its canonical relative form. Rejects anything
    /// that could step outside the root.
    fn resolve_folder(&self, folder: &str) -> Result<(PathBuf, String), StorageError> {
        let trimmed = folder.trim().trim_matches(['/', '\\']);
        let mut relative = PathBuf::new();
        let mut segments: Vec<&str> = Vec::new();

        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => {
                    let segment = segment.to_str().ok_or(StorageError::InvalidPath)?;
                    segments.push(segment);
                    relative.push(segment);
                }
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        if segments.is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok((self.root.join(relative), segments.join("/")))
    }

    /// Walk every component between the root and `target`, refusing
    /// symlinks so a planted link cannot redirect writes or deletes
    /// outside the storage root.
    async fn reject_symlink_components(
        &self,
        target: &Path,
        allow_missing: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = self.root.clone();
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing => return Ok(()),
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

/// A stored file name is a single path component; anything else would let
/// the delete endpoint reach outside its folder.
fn validate_file_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidPath);
    }
    Ok(())
}

async fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
        Ok(())
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
