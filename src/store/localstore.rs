//! Local filesystem storage.
//!
//! All state apart from the lock table lives on disk, so several handlers
//! may serve the same directory. Dead properties are not supported, a
//! PROPPATCH is accepted and ignored.

use std::io;
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use futures_util::{future, FutureExt, StreamExt};
use http::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::davpath::DavPath;
use crate::store::memls::MemLs;
use crate::store::*;

/// Local filesystem storage.
pub struct LocalStore {
    basedir: PathBuf,
    public: bool,
    locks: MemLs,
}

// same as the default apache etag.
fn etag(meta: &std::fs::Metadata) -> Option<String> {
    let modified = meta.modified().ok()?;
    let t = modified.duration_since(UNIX_EPOCH).ok()?;
    let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
    let tag = match inode(meta) {
        Some(ino) if meta.is_file() => format!("{:x}-{:x}-{:x}", ino, meta.len(), t),
        Some(ino) => format!("{:x}-{:x}", ino, t),
        None if meta.is_file() => format!("{:x}-{:x}", meta.len(), t),
        None => format!("{:x}", t),
    };
    Some(tag)
}

#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> Option<u64> {
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

fn meta_properties(meta: &std::fs::Metadata, name: &str) -> PropMap {
    let mut props = PropMap::new();
    if meta.is_dir() {
        props.insert(PropName::dav("resourcetype"), "collection".into());
    } else {
        props.insert(PropName::dav("resourcetype"), PropValue::Empty);
        let mime = mime_guess::from_path(name).first_or_octet_stream();
        props.insert(PropName::dav("getcontenttype"), mime.to_string().into());
        props.insert(PropName::dav("getcontentlength"), meta.len().to_string().into());
    }
    if !name.is_empty() {
        props.insert(PropName::dav("displayname"), name.into());
    }
    if let Ok(t) = meta.modified() {
        props.insert(PropName::dav("getlastmodified"), t.into());
    }
    if let Ok(t) = meta.created() {
        props.insert(PropName::dav("creationdate"), t.into());
    }
    if let Some(etag) = etag(meta) {
        props.insert(PropName::dav("getetag"), etag.into());
    }
    props
}

// recursive directory copy. symlinks are skipped.
fn copy_dir<'a>(from: &'a Path, to: &'a Path, public: bool) -> BoxFuture<'a, io::Result<()>> {
    async move {
        create_dir(to, public).await?;
        let mut read_dir = tokio::fs::read_dir(from).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let ft = entry.file_type().await?;
            let dst = to.join(entry.file_name());
            if ft.is_dir() {
                copy_dir(&entry.path(), &dst, public).await?;
            } else if ft.is_file() {
                tokio::fs::copy(entry.path(), &dst).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

async fn create_dir(path: &Path, public: bool) -> io::Result<()> {
    #[allow(unused_mut)]
    let mut dir = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    dir.mode(if public { 0o755 } else { 0o700 });
    #[cfg(not(unix))]
    let _ = public;
    dir.create(path).await
}

async fn remove_any(path: &Path) -> io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

impl LocalStore {
    /// Create a new LocalStore, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will be
    /// publically readable (mode 644/755), otherwise they will be private
    /// (mode 600/700). Umask still overrides this.
    pub fn new(base: impl Into<PathBuf>, public: bool) -> Arc<LocalStore> {
        LocalStore::with_lock_timeout(base, public, Some(Duration::from_secs(300)))
    }

    /// Like `new()`, with locks expiring after `timeout`.
    pub fn with_lock_timeout(
        base: impl Into<PathBuf>,
        public: bool,
        timeout: Option<Duration>,
    ) -> Arc<LocalStore> {
        Arc::new(LocalStore {
            basedir: base.into(),
            public,
            locks: MemLs::new(timeout),
        })
    }

    fn abs_path(&self, path: &DavPath) -> PathBuf {
        let mut pathbuf = self.basedir.clone();
        pathbuf.push(path.as_rel_ospath());
        pathbuf
    }

    async fn check_parent(&self, path: &Path) -> StoreResult<()> {
        let parent = path.parent().ok_or(StoreError::Forbidden)?;
        match tokio::fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(StoreError::Conflict),
        }
    }

    // remove an existing destination, report if it was absent.
    async fn clear_destination(&self, to: &Path) -> StoreResult<bool> {
        self.check_parent(to).await?;
        match remove_any(to).await {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl DavStorage for LocalStore {
    fn get<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<DavContent>> {
        async move {
            trace!("LocalStore: get {path}");
            let abs = self.abs_path(path);
            match tokio::fs::metadata(&abs).await {
                Ok(meta) if meta.is_file() => Ok(Some(DavContent::Path(abs))),
                Ok(_) => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn exists<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, bool> {
        async move { Ok(tokio::fs::symlink_metadata(self.abs_path(path)).await.is_ok()) }.boxed()
    }

    fn properties<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
        _depth: u32,
    ) -> StoreFuture<'a, Option<PropMap>> {
        async move {
            trace!("LocalStore: properties {path}");
            match tokio::fs::metadata(self.abs_path(path)).await {
                Ok(meta) => Ok(Some(select_properties(
                    meta_properties(&meta, path.file_name()),
                    requested,
                ))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn put<'a>(&'a self, path: &'a DavPath, mut body: PutStream<'a>) -> StoreFuture<'a, bool> {
        async move {
            trace!("LocalStore: put {path}");
            let abs = self.abs_path(path);
            self.check_parent(&abs).await?;
            let created = match tokio::fs::metadata(&abs).await {
                Ok(meta) if meta.is_dir() => {
                    return Err(StoreError::Status(
                        StatusCode::METHOD_NOT_ALLOWED,
                        "Cannot PUT to a collection".to_string(),
                    ))
                }
                Ok(_) => false,
                Err(_) => true,
            };

            let mut opt = tokio::fs::OpenOptions::new();
            opt.write(true).create(true).truncate(true);
            #[cfg(unix)]
            opt.mode(if self.public { 0o644 } else { 0o600 });
            let mut file = opt.open(&abs).await?;
            while let Some(chunk) = body.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            Ok(created)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("LocalStore: delete {path}");
            if path.is_root() {
                return Err(StoreError::Forbidden);
            }
            remove_any(&self.abs_path(path)).await?;
            self.locks.remove_below(path);
            Ok(())
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool> {
        async move {
            trace!("LocalStore: copy {from} {to}");
            let (p_from, p_to) = (self.abs_path(from), self.abs_path(to));
            let meta = tokio::fs::metadata(&p_from).await?;
            let created = self.clear_destination(&p_to).await?;
            if meta.is_dir() {
                copy_dir(&p_from, &p_to, self.public).await?;
            } else if let Err(e) = tokio::fs::copy(&p_from, &p_to).await {
                debug!("copy({from}, {to}) failed: {e}");
                return Err(e.into());
            }
            Ok(created)
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool> {
        async move {
            trace!("LocalStore: rename {from} {to}");
            let (p_from, p_to) = (self.abs_path(from), self.abs_path(to));
            tokio::fs::symlink_metadata(&p_from).await?;
            let created = self.clear_destination(&p_to).await?;
            tokio::fs::rename(&p_from, &p_to).await?;
            self.locks.remove_below(from);
            Ok(created)
        }
        .boxed()
    }

    fn mkcol<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("LocalStore: mkcol {path}");
            let abs = self.abs_path(path);
            if tokio::fs::symlink_metadata(&abs).await.is_ok() {
                return Err(StoreError::Exists);
            }
            self.check_parent(&abs).await?;
            Ok(create_dir(&abs, self.public).await?)
        }
        .boxed()
    }

    fn list<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
    ) -> StoreFuture<'a, Vec<DavListEntry>> {
        async move {
            trace!("LocalStore: list {path}");
            let mut read_dir = tokio::fs::read_dir(self.abs_path(path)).await?;
            let mut entries = Vec::new();
            loop {
                match read_dir.next_entry().await {
                    Ok(Some(entry)) => {
                        let name = match entry.file_name().into_string() {
                            Ok(name) => name,
                            Err(name) => {
                                debug!("skipping non-UTF-8 name {name:?}");
                                continue;
                            }
                        };
                        // symlinks are not followed, and not shown.
                        match entry.file_type().await {
                            Ok(ft) if ft.is_symlink() => continue,
                            Ok(_) => {}
                            Err(e) => {
                                debug!("skipping {name}: {e}");
                                continue;
                            }
                        }
                        let props = entry
                            .metadata()
                            .await
                            .ok()
                            .map(|meta| select_properties(meta_properties(&meta, &name), requested));
                        entries.push(DavListEntry { name, props });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("read_dir failed {e}");
                        break;
                    }
                }
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        }
        .boxed()
    }

    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        scope: LockScope,
        deep: bool,
    ) -> StoreFuture<'a, ()> {
        Box::pin(future::ready(self.locks.lock(path, token, scope, deep)))
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(future::ready(self.locks.unlock(path, token)))
    }

    fn get_lock<'a>(
        &'a self,
        path: &'a DavPath,
        token: Option<&'a str>,
    ) -> StoreFuture<'a, Option<LockScope>> {
        Box::pin(future::ready(Ok(self.locks.get_lock(path, token))))
    }

    fn locked_below<'a>(
        &'a self,
        path: &'a DavPath,
        token: Option<&'a str>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(future::ready(Ok(self.locks.locked_below(path, token))))
    }
}
