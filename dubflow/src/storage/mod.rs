//! Blob storage for uploads and generated media.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::utils::fs::{copy_file, ensure_parent_dir, io_error, write_file};
use crate::utils::http_client::ensure_success;
use crate::{Error, Result};

/// Where uploads and generated media live. Everything is addressed by URL.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` under `name` (a relative `/`-separated key) and return its URL.
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<String>;
    /// Store the file at `path` under `name` and return its URL.
    async fn put_file(&self, name: &str, path: &Path) -> Result<String>;
    /// Fetch the object at `url` into `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Files under a root directory, served over HTTP below `public_base_url`.
///
/// URLs under the public base are resolved straight to disk; any other
/// `http(s)` URL (such as a provider's result) is fetched with `reqwest`.
pub struct LocalBlobStorage {
    root: PathBuf,
    public_base_url: String,
    client: Client,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>, client: Client) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url, name)
    }

    /// Map a storage key to a path under the root, refusing anything that escapes it.
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::validation(format!("invalid storage key '{name}'")));
        }
        Ok(self.root.join(relative))
    }

    fn local_key<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(&self.public_base_url)?.strip_prefix('/')
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        let response = ensure_success("blob download", response).await?;

        ensure_parent_dir(dest).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| io_error("creating file", dest, e))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error("writing file", dest, e))?;
        }
        file.flush()
            .await
            .map_err(|e| io_error("writing file", dest, e))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(name)?;
        write_file(&path, bytes).await?;
        debug!(key = name, size = bytes.len(), "Stored blob");
        Ok(self.url_for(name))
    }

    async fn put_file(&self, name: &str, path: &Path) -> Result<String> {
        let target = self.path_for(name)?;
        copy_file(path, &target).await?;
        debug!(key = name, source = %path.display(), "Stored blob from file");
        Ok(self.url_for(name))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(key) = self.local_key(url) {
            let source = self.path_for(key)?;
            return copy_file(&source, dest).await;
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| Error::validation(format!("invalid blob url '{url}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => self.fetch(url, dest).await,
            scheme => Err(Error::validation(format!(
                "unsupported blob url scheme '{scheme}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> reqwest::Client {
        crate::utils::http_client::build_client(std::time::Duration::from_secs(5)).unwrap()
    }

    fn storage(dir: &Path) -> LocalBlobStorage {
        LocalBlobStorage::new(dir, "http://localhost:8080/files/", test_client())
    }

    #[tokio::test]
    async fn test_put_and_download_local() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let url = storage.put("abc123/ad.mp4", b"video").await.unwrap();
        assert_eq!(url, "http://localhost:8080/files/abc123/ad.mp4");
        assert!(dir.path().join("abc123/ad.mp4").exists());

        let dest = dir.path().join("scratch/source.mp4");
        storage.download(&url, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_put_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let src = dir.path().join("local.mp3");
        tokio::fs::write(&src, b"audio").await.unwrap();

        let url = storage.put_file("abc123/audio.mp3", &src).await.unwrap();
        assert!(url.ends_with("/abc123/audio.mp3"));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        for key in ["../x", "/etc/passwd", "", "a/../../b"] {
            let err = storage.put(key, b"x").await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "key {key:?}");
        }
        let err = storage
            .download("http://localhost:8080/files/../secret", &dir.path().join("o"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_unknown_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let err = storage
            .download("ftp://example.com/x.mp4", &dir.path().join("o"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
