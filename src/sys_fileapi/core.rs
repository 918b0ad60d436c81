//! Core file‑API logic: no Hyper types here.

use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};

use crate::sys_config::core::{ConfigError, FileApiConfig};
use crate::sys_pathguard::core::{self as pathguard, ResolveError, ResolvedPath, Root};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("'{0}' does not exist")]
    NotFound(String),

    #[error("cannot access file: {0}")]
    AccessFailure(#[source] io::Error),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("file size {size} exceeds maximum {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("directory '{0}' is not empty")]
    DirectoryNotEmpty(String),

    #[error("method '{0}' is not supported")]
    MethodNotSupported(String),
}

impl ApiError {
    /// Stable, machine-readable name of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Resolve(ResolveError::PathTraversal) => "PathTraversal",
            ApiError::Resolve(ResolveError::OutsideRoot) => "OutsideRoot",
            ApiError::Resolve(ResolveError::ResolutionFailure(_)) => "ResolutionFailure",
            ApiError::NotFound(_) => "NotFound",
            ApiError::AccessFailure(_) => "AccessFailure",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::TooLarge { .. } => "TooLarge",
            ApiError::DirectoryNotEmpty(_) => "DirectoryNotEmpty",
            ApiError::MethodNotSupported(_) => "MethodNotSupported",
        }
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub mod_time: DateTime<Utc>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub path: String,
    pub files: Vec<EntryMetadata>,
    /// Sum of file sizes; directories do not count.
    pub total_size: u64,
    pub count: usize,
}

/// Result of a dispatched request, for the transport to render.
#[derive(Debug)]
pub enum Outcome {
    /// A regular file to be streamed by the caller.
    FileContent {
        path: PathBuf,
        size: u64,
        modified: Option<SystemTime>,
    },
    Listing(DirectoryListing),
    Created { path: String, size: u64 },
    Updated { path: String, size: u64 },
    Deleted { path: String },
}

/// Request verb plus its verb-specific inputs.
pub enum Verb<R> {
    Get,
    Put {
        body: R,
        declared_len: Option<u64>,
    },
    Delete {
        recursive: bool,
    },
    Other(String),
}

/// Request dispatcher bound to one root and one set of flags.
///
/// Holds no mutable state, so a single instance can be shared behind an
/// `Arc` by every connection.
#[derive(Debug)]
pub struct FileApi {
    root: Root,
    read_only: bool,
    allow_delete: bool,
    max_file_size: u64,
}

impl FileApi {
    pub fn new(config: &FileApiConfig) -> Result<Self, ConfigError> {
        let root = Root::new(&config.root).map_err(|source| ConfigError::Root {
            path: config.root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            read_only: config.read_only,
            allow_delete: config.allow_delete,
            max_file_size: config.max_file_size,
        })
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn resolve(&self, request_path: &str) -> Result<ResolvedPath, ApiError> {
        Ok(pathguard::resolve(&self.root, request_path)?)
    }

    /// Resolve `request_path` and run the operation for `verb` on it.
    /// Mutations on a server that forbids them are refused before the path
    /// is looked at.
    pub async fn dispatch<R>(&self, request_path: &str, verb: Verb<R>) -> Result<Outcome, ApiError>
    where
        R: AsyncRead + Unpin,
    {
        match verb {
            Verb::Get => {
                let path = self.resolve(request_path)?;
                self.read(&path).await
            }
            Verb::Put { body, declared_len } => {
                self.ensure_writable()?;
                let path = self.resolve(request_path)?;
                self.write(&path, body, declared_len).await
            }
            Verb::Delete { recursive } => {
                self.ensure_deletable()?;
                let path = self.resolve(request_path)?;
                self.delete(&path, recursive).await
            }
            Verb::Other(method) => Err(ApiError::MethodNotSupported(method)),
        }
    }

    /// GET: file descriptor for streaming, or a listing for directories.
    pub async fn read(&self, path: &ResolvedPath) -> Result<Outcome, ApiError> {
        let meta = self.stat(path).await?;
        if meta.is_dir() {
            return Ok(Outcome::Listing(self.list_directory(path).await?));
        }
        Ok(Outcome::FileContent {
            path: path.as_path().to_path_buf(),
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    /// Enumerate a directory. Children whose metadata cannot be read are
    /// skipped.
    pub async fn list_directory(&self, path: &ResolvedPath) -> Result<DirectoryListing, ApiError> {
        let mut dir = fs::read_dir(path.as_path())
            .await
            .map_err(ApiError::AccessFailure)?;

        let mut files = Vec::new();
        let mut total_size = 0;
        while let Some(entry) = dir.next_entry().await.map_err(ApiError::AccessFailure)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    debug!("skipping '{}' in listing: {}", name, e);
                    continue;
                }
            };

            let is_dir = meta.is_dir();
            let size = if is_dir { 0 } else { meta.len() };
            let mime_type = if is_dir {
                None
            } else {
                total_size += size;
                mime_guess::from_path(&name).first().map(|m| m.to_string())
            };

            files.push(EntryMetadata {
                path: path.child_display(&self.root, &name),
                name,
                is_dir,
                size,
                mod_time: DateTime::<Utc>::from(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
                mime_type,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(DirectoryListing {
            path: path.display_relative(&self.root),
            count: files.len(),
            files,
            total_size,
        })
    }

    /// PUT: create or replace a file with at most `max_file_size` bytes of
    /// `body`. `declared_len` is only an early hint; the byte count of the
    /// copy decides.
    pub async fn write<R>(
        &self,
        path: &ResolvedPath,
        body: R,
        declared_len: Option<u64>,
    ) -> Result<Outcome, ApiError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_writable()?;
        if path.is_root(&self.root) {
            return Err(ApiError::Forbidden("the root directory cannot be written"));
        }
        let max = self.max_file_size;
        if let Some(size) = declared_len.filter(|&n| n > max) {
            return Err(ApiError::TooLarge { size, max });
        }

        let target = path.as_path();
        let existed = match fs::metadata(target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(ApiError::Forbidden("cannot write over a directory"));
            }
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(ApiError::AccessFailure(e)),
        };

        // the target is not the root, so its parent is the root or below it
        if !existed {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(ApiError::AccessFailure)?;
            }
        }

        let mut file = fs::File::create(target)
            .await
            .map_err(ApiError::AccessFailure)?;
        let mut limited = body.take(max.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file)
            .await
            .map_err(ApiError::AccessFailure)?;
        file.flush().await.map_err(ApiError::AccessFailure)?;
        drop(file);

        if written > max {
            if let Err(e) = fs::remove_file(target).await {
                warn!("cannot remove oversized upload {}: {}", target.display(), e);
            }
            return Err(ApiError::TooLarge { size: written, max });
        }

        let display = path.display_relative(&self.root);
        Ok(if existed {
            Outcome::Updated { path: display, size: written }
        } else {
            Outcome::Created { path: display, size: written }
        })
    }

    /// DELETE: remove a file, an empty directory, or with `recursive` a
    /// whole tree. The root itself is never removed.
    pub async fn delete(&self, path: &ResolvedPath, recursive: bool) -> Result<Outcome, ApiError> {
        self.ensure_deletable()?;
        if path.is_root(&self.root) {
            return Err(ApiError::Forbidden("the root directory cannot be deleted"));
        }

        let display = path.display_relative(&self.root);
        let meta = self.stat(path).await?;
        let result = if !meta.is_dir() {
            fs::remove_file(path.as_path()).await
        } else if recursive {
            fs::remove_dir_all(path.as_path()).await
        } else {
            fs::remove_dir(path.as_path()).await
        };

        match result {
            Ok(()) => Ok(Outcome::Deleted { path: display }),
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                Err(ApiError::DirectoryNotEmpty(display))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ApiError::NotFound(display)),
            Err(e) => Err(ApiError::AccessFailure(e)),
        }
    }

    fn ensure_writable(&self) -> Result<(), ApiError> {
        if self.read_only {
            return Err(ApiError::Forbidden("server is read-only"));
        }
        Ok(())
    }

    fn ensure_deletable(&self) -> Result<(), ApiError> {
        self.ensure_writable()?;
        if !self.allow_delete {
            return Err(ApiError::Forbidden("delete operations are disabled by configuration"));
        }
        Ok(())
    }

    async fn stat(&self, path: &ResolvedPath) -> Result<std::fs::Metadata, ApiError> {
        match fs::metadata(path.as_path()).await {
            Ok(meta) => Ok(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ApiError::NotFound(path.display_relative(&self.root)))
            }
            Err(e) => Err(ApiError::AccessFailure(e)),
        }
    }
}

/// RFC 3339, UTC, whole seconds: `2024-01-01T12:00:00Z`.
pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn serialize_rfc3339<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&rfc3339(*t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn api_with(f: impl FnOnce(&mut FileApiConfig)) -> (TempDir, FileApi) {
        let dir = TempDir::new().unwrap();
        let mut config = FileApiConfig {
            root: dir.path().to_path_buf(),
            ..FileApiConfig::default()
        };
        f(&mut config);
        let api = FileApi::new(&config).unwrap();
        (dir, api)
    }

    fn api() -> (TempDir, FileApi) {
        api_with(|_| {})
    }

    async fn put(api: &FileApi, path: &str, body: &[u8]) -> Result<Outcome, ApiError> {
        api.dispatch(
            path,
            Verb::Put {
                body,
                declared_len: Some(body.len() as u64),
            },
        )
        .await
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, api) = api();
        let out = put(&api, "/a/b.txt", b"hello").await.unwrap();
        assert!(matches!(out, Outcome::Created { ref path, size: 5 } if path == "/a/b.txt"));

        match api.dispatch::<&[u8]>("/a/b.txt", Verb::Get).await.unwrap() {
            Outcome::FileContent { path, size, .. } => {
                assert_eq!(size, 5);
                assert_eq!(std::fs::read(path).unwrap(), b"hello");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_write_is_an_update() {
        let (_dir, api) = api();
        put(&api, "/f.txt", b"one").await.unwrap();
        let out = put(&api, "/f.txt", b"three").await.unwrap();
        assert!(matches!(out, Outcome::Updated { size: 5, .. }));
    }

    #[tokio::test]
    async fn size_limit_boundary() {
        let (dir, api) = api_with(|c| c.max_file_size = 4);

        let out = put(&api, "/ok.bin", b"1234").await.unwrap();
        assert!(matches!(out, Outcome::Created { size: 4, .. }));

        // declared length omitted, so only the streaming cap can catch it
        let err = api
            .dispatch(
                "/big.bin",
                Verb::Put {
                    body: &b"12345"[..],
                    declared_len: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TooLarge { size: 5, max: 4 }));
        assert!(!dir.path().join("big.bin").exists());
    }

    #[tokio::test]
    async fn declared_length_is_checked_first() {
        let (dir, api) = api_with(|c| c.max_file_size = 4);
        let err = api
            .dispatch(
                "/lie.bin",
                Verb::Put {
                    body: &b"12"[..],
                    declared_len: Some(10),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TooLarge");
        assert!(!dir.path().join("lie.bin").exists());
    }

    #[tokio::test]
    async fn read_only_refuses_mutation() {
        let (dir, api) = api_with(|c| c.read_only = true);
        let err = put(&api, "/x.txt", b"x").await.unwrap_err();
        assert_eq!(err.kind(), "Forbidden");
        assert!(!dir.path().join("x.txt").exists());

        std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        let err = api
            .dispatch::<&[u8]>("/keep.txt", Verb::Delete { recursive: false })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Forbidden");
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn read_only_is_checked_before_the_path() {
        let (_dir, api) = api_with(|c| c.read_only = true);
        let err = put(&api, "/../x.txt", b"x").await.unwrap_err();
        assert_eq!(err.kind(), "Forbidden");

        let err = api
            .dispatch::<&[u8]>("/../x.txt", Verb::Delete { recursive: false })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Forbidden");
    }

    #[tokio::test]
    async fn directories_cannot_be_overwritten() {
        let (dir, api) = api();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        for target in ["/", "/sub"] {
            let err = put(&api, target, b"x").await.unwrap_err();
            assert_eq!(err.kind(), "Forbidden", "{target}");
        }
        assert!(dir.path().join("sub").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_through_dangling_symlink_stays_inside() {
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("pwned.txt");
        let (dir, api) = api();
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let err = put(&api, "/link", b"escaped").await.unwrap_err();
        assert_eq!(err.kind(), "OutsideRoot");
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn delete_can_be_disabled() {
        let (dir, api) = api_with(|c| c.allow_delete = false);
        std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        let err = api
            .dispatch::<&[u8]>("/keep.txt", Verb::Delete { recursive: false })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Forbidden");
    }

    #[tokio::test]
    async fn listing_counts_files_and_dirs() {
        let (dir, api) = api();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join("b.json"), b"{}").unwrap();

        let listing = match api.dispatch::<&[u8]>("/", Verb::Get).await.unwrap() {
            Outcome::Listing(l) => l,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(listing.path, "/");
        assert_eq!(listing.count, 3);
        assert_eq!(listing.total_size, 7);

        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.json", "sub"]);

        let sub = &listing.files[2];
        assert!(sub.is_dir);
        assert_eq!(sub.size, 0);
        assert_eq!(sub.mime_type, None);
        assert_eq!(sub.path, "/sub");

        assert_eq!(listing.files[0].mime_type.as_deref(), Some("text/plain"));
        assert_eq!(listing.files[1].mime_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn nested_listing_paths_use_forward_slashes() {
        let (dir, api) = api();
        std::fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        std::fs::write(dir.path().join("a").join("b").join("c.txt"), b"c").unwrap();

        let resolved = api.resolve("/a/b/").unwrap();
        let listing = api.list_directory(&resolved).await.unwrap();
        assert_eq!(listing.path, "/a/b");
        assert_eq!(listing.files[0].path, "/a/b/c.txt");
    }

    #[tokio::test]
    async fn delete_is_idempotent_in_reporting_not_found() {
        let (dir, api) = api();
        std::fs::write(dir.path().join("gone.txt"), b"x").unwrap();

        let out = api
            .dispatch::<&[u8]>("/gone.txt", Verb::Delete { recursive: false })
            .await
            .unwrap();
        assert!(matches!(out, Outcome::Deleted { .. }));

        for _ in 0..2 {
            let err = api
                .dispatch::<&[u8]>("/gone.txt", Verb::Delete { recursive: false })
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "NotFound");
        }
    }

    #[tokio::test]
    async fn non_recursive_delete_keeps_full_directory() {
        let (dir, api) = api();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a").join("b.txt"), b"x").unwrap();

        let err = api
            .dispatch::<&[u8]>("/a", Verb::Delete { recursive: false })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DirectoryNotEmpty");
        assert!(dir.path().join("a").join("b.txt").exists());

        api.dispatch::<&[u8]>("/a", Verb::Delete { recursive: true })
            .await
            .unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn root_cannot_be_deleted() {
        let (dir, api) = api();
        let err = api
            .dispatch::<&[u8]>("/", Verb::Delete { recursive: true })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Forbidden");
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let (_dir, api) = api();
        let err = api
            .dispatch::<&[u8]>("/", Verb::Other("PATCH".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MethodNotSupported");
    }

    #[test]
    fn rfc3339_uses_whole_seconds_and_z() {
        let t = DateTime::<Utc>::from_timestamp(1_704_110_400, 123).unwrap();
        assert_eq!(rfc3339(t), "2024-01-01T12:00:00Z");
    }
}
