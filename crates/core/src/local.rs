//! Local filesystem backend for `file` URIs

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};
use crate::traits::{
    ByteRange, Capabilities, ListOptions, ListResult, ObjectInfo, ResourceBackend, TransferMode,
    paginate,
};
use crate::uri::{FILE_SCHEME, Uri};

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn local_path(uri: &Uri) -> Result<PathBuf> {
    uri.to_local_path()
        .ok_or_else(|| Error::InvalidUri(format!("{uri}: not a local file URI")))
}

fn not_found(uri: &Uri) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{uri} does not exist"),
    ))
}

async fn info_for(key: String, path: &Path) -> Result<ObjectInfo> {
    let metadata = tokio::fs::metadata(path).await?;
    let mut info = if metadata.is_dir() {
        ObjectInfo::dir(key)
    } else {
        ObjectInfo::file(key, metadata.len())
    };
    info.last_modified = metadata
        .modified()
        .ok()
        .and_then(|t| jiff::Timestamp::try_from(t).ok());
    Ok(info)
}

/// Write to a fresh sibling temporary file, then rename over the target
///
/// Every call gets its own temporary file, so concurrent writers to one
/// path never share it; the last rename wins.
async fn write_atomic(path: &Path, data: Bytes) -> Result<()> {
    let path = path.to_path_buf();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let written = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".rp-").suffix(".tmp");
        // Same mode as a plain create, so the umask decides
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        let mut tmp = builder.tempfile_in(&dir)?;
        tmp.write_all(&data)?;
        // Dropping the temporary file on any error removes it
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    })
    .await;
    written.map_err(|e| Error::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl ResourceBackend for LocalBackend {
    fn scheme(&self) -> &str {
        FILE_SCHEME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            write: true,
            delete: true,
            mkdir: true,
            server_side_copy: true,
        }
    }

    async fn read(&self, uri: &Uri, range: Option<ByteRange>) -> Result<Bytes> {
        let path = local_path(uri)?;
        let Some(range) = range else {
            return Ok(tokio::fs::read(&path).await?.into());
        };

        let mut file = tokio::fs::File::open(&path).await?;
        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let mut buf = Vec::new();
        match range.end {
            Some(end) => {
                let len = end - range.start + 1;
                file.take(len).read_to_end(&mut buf).await?;
            }
            None => {
                file.read_to_end(&mut buf).await?;
            }
        }
        Ok(buf.into())
    }

    async fn write(&self, uri: &Uri, data: Bytes, overwrite: bool) -> Result<()> {
        if uri.is_dir_like() {
            return Err(Error::InvalidUri(format!("{uri}: cannot write to a directory")));
        }
        let path = local_path(uri)?;
        if !overwrite && tokio::fs::try_exists(&path).await? {
            return Err(Error::AlreadyExists(uri.to_string()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let len = data.len();
        write_atomic(&path, data).await?;
        tracing::debug!(uri = %uri, bytes = len, "Wrote local file");
        Ok(())
    }

    async fn exists(&self, uri: &Uri) -> Result<bool> {
        let path = local_path(uri)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(!uri.is_dir_like() || metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, uri: &Uri) -> Result<()> {
        let path = local_path(uri)?;
        if uri.is_dir_like() {
            tokio::fs::remove_dir(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn size(&self, uri: &Uri) -> Result<u64> {
        if uri.is_dir_like() {
            return Ok(0);
        }
        let path = local_path(uri)?;
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            return Ok(0);
        }
        Ok(metadata.len())
    }

    async fn stat(&self, uri: &Uri) -> Result<ObjectInfo> {
        let path = local_path(uri)?;
        info_for(uri.path().to_string(), &path).await
    }

    async fn list(&self, uri: &Uri, options: ListOptions) -> Result<ListResult> {
        let root = local_path(&uri.as_directory())?;
        if !tokio::fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(not_found(uri));
        }

        let mut items = Vec::new();
        let mut pending = vec![(root, String::new())];
        while let Some((dir, rel)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = format!("{rel}{name}");
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if options.recursive {
                        pending.push((entry.path(), format!("{key}/")));
                    } else {
                        items.push(info_for(format!("{key}/"), &entry.path()).await?);
                    }
                } else {
                    items.push(info_for(key, &entry.path()).await?);
                }
            }
        }

        Ok(paginate(items, &options))
    }

    async fn mkdir(&self, uri: &Uri) -> Result<()> {
        if !uri.is_dir_like() {
            return Err(Error::InvalidUri(format!(
                "{uri}: directory URIs must end with '/'"
            )));
        }
        tokio::fs::create_dir_all(local_path(uri)?).await?;
        Ok(())
    }

    async fn copy(&self, src: &Uri, dst: &Uri, mode: TransferMode, overwrite: bool) -> Result<()> {
        let from = local_path(src)?;
        let to = local_path(dst)?;
        if !tokio::fs::try_exists(&from).await? {
            return Err(not_found(src));
        }
        if !overwrite && tokio::fs::try_exists(&to).await? {
            return Err(Error::AlreadyExists(dst.to_string()));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match mode {
            TransferMode::Copy => {
                tokio::fs::copy(&from, &to).await?;
            }
            TransferMode::Move => {
                if let Err(e) = tokio::fs::rename(&from, &to).await {
                    // Rename fails across filesystems
                    tracing::debug!(error = %e, "Rename failed, falling back to copy and delete");
                    tokio::fs::copy(&from, &to).await?;
                    tokio::fs::remove_file(&from).await?;
                }
            }
        }
        Ok(())
    }
}
