//! Contains the structs and traits that define a storage backend.
//!
//! The protocol core never reads or writes resource bytes or metadata on its
//! own; everything goes through [`DavStorage`]. You only need this module if
//! you want to plug in your own backend, otherwise use one of the reference
//! implementations through [`Storage`](crate::Storage).
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::future::{self, Future};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::StatusCode;
use tokio::io::AsyncRead;

use crate::davpath::DavPath;

#[cfg(any(docsrs, feature = "localstore"))]
pub(crate) mod localstore;
pub mod memls;
#[cfg(any(docsrs, feature = "memstore"))]
pub(crate) mod memstore;

#[cfg(any(docsrs, feature = "localstore"))]
pub use localstore::LocalStore;
#[cfg(any(docsrs, feature = "memstore"))]
pub use memstore::MemStore;

/// The `DAV:` namespace.
pub const NS_DAV_URI: &str = "DAV:";

/// Properties a storage returns when the client did not ask for specific ones.
pub const DEFAULT_PROPERTIES: &[&str] = &[
    "resourcetype",
    "getcontenttype",
    "getlastmodified",
    "getcontentlength",
    "displayname",
];

/// Errors generated by a storage implementation.
///
/// The handler forwards these to the client as the matching status code.
#[derive(Debug)]
pub enum StoreError {
    NotFound,
    Exists,
    Forbidden,
    Conflict,
    Locked,
    NotImplemented,
    Status(StatusCode, String),
    Io(io::Error),
}

/// The Result type for the storage methods.
pub type StoreResult<T> = Result<T, StoreError>;

/// Future returned by almost all of the `DavStorage` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Request body handed to [`DavStorage::put`].
pub type PutStream<'a> = BoxStream<'a, io::Result<Bytes>>;

impl StoreError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::Exists => StatusCode::METHOD_NOT_ALLOWED,
            StoreError::Forbidden => StatusCode::FORBIDDEN,
            StoreError::Conflict => StatusCode::CONFLICT,
            StoreError::Locked => StatusCode::LOCKED,
            StoreError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            StoreError::Status(s, _) => *s,
            StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => f.write_str("Resource not found"),
            StoreError::Exists => f.write_str("Resource already exists"),
            StoreError::Forbidden => f.write_str("Forbidden"),
            StoreError::Conflict => f.write_str("Parent collection does not exist"),
            StoreError::Locked => f.write_str("Resource is locked"),
            StoreError::NotImplemented => f.write_str("Not implemented"),
            StoreError::Status(_, msg) => f.write_str(msg),
            StoreError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound,
            io::ErrorKind::PermissionDenied => StoreError::Forbidden,
            io::ErrorKind::AlreadyExists => StoreError::Exists,
            _ => StoreError::Io(e),
        }
    }
}

/// A property name: namespace URI plus local name.
///
/// The string form is `namespace-URI:local-name`, e.g. `DAV::getetag`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropName {
    pub ns: String,
    pub name: String,
}

impl PropName {
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> PropName {
        PropName {
            ns: ns.into(),
            name: name.into(),
        }
    }

    /// A property in the `DAV:` namespace.
    pub fn dav(name: &str) -> PropName {
        PropName::new(NS_DAV_URI, name)
    }

    /// Parse the `namespace-URI:local-name` form.
    pub fn parse(key: &str) -> Option<PropName> {
        let (ns, name) = key.rsplit_once(':')?;
        if name.is_empty() {
            return None;
        }
        Some(PropName::new(ns, name))
    }

    pub fn is_dav(&self, name: &str) -> bool {
        self.ns == NS_DAV_URI && self.name == name
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ns, self.name)
    }
}

/// The `DEFAULT_PROPERTIES` as `PropName`s.
pub fn default_properties() -> Vec<PropName> {
    DEFAULT_PROPERTIES.iter().map(|p| PropName::dav(p)).collect()
}

/// Value of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// Rendered as escaped text.
    Text(String),
    /// `true` on `DAV:resourcetype` marks a collection.
    Bool(bool),
    Date(SystemTime),
    /// A pre-rendered XML fragment, written out as-is.
    Xml {
        attributes: Vec<(String, String)>,
        xml: String,
    },
    Empty,
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Text(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Text(s)
    }
}

impl From<SystemTime> for PropValue {
    fn from(t: SystemTime) -> Self {
        PropValue::Date(t)
    }
}

impl PropValue {
    /// Text content, if this is a plain value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

pub type PropMap = BTreeMap<PropName, PropValue>;

/// Does this property map describe a collection.
pub fn is_collection(props: &PropMap) -> bool {
    match props.get(&PropName::dav("resourcetype")) {
        Some(PropValue::Text(t)) => t == "collection",
        Some(PropValue::Bool(b)) => *b,
        Some(PropValue::Xml { xml, .. }) => xml.contains("collection"),
        _ => false,
    }
}

/// Reduce the full property map of a resource to what the client asked for.
///
/// Without a request list, `DAV:` properties are limited to
/// [`DEFAULT_PROPERTIES`] plus `getetag` and `creationdate`; dead properties
/// in other namespaces are all kept.
pub fn select_properties(all: PropMap, requested: Option<&[PropName]>) -> PropMap {
    match requested {
        Some(req) => all.into_iter().filter(|(k, _)| req.contains(k)).collect(),
        None => all
            .into_iter()
            .filter(|(k, _)| {
                k.ns != NS_DAV_URI
                    || DEFAULT_PROPERTIES.contains(&k.name.as_str())
                    || k.name == "getetag"
                    || k.name == "creationdate"
            })
            .collect(),
    }
}

/// Content of a resource, as returned by [`DavStorage::get`].
pub enum DavContent {
    Bytes(Bytes),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// A local file, opened only when the body is sent.
    Path(PathBuf),
}

impl fmt::Debug for DavContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavContent::Bytes(b) => write!(f, "DavContent::Bytes({} bytes)", b.len()),
            DavContent::Stream(_) => f.write_str("DavContent::Stream"),
            DavContent::Path(p) => write!(f, "DavContent::Path({p:?})"),
        }
    }
}

/// One entry of a collection listing.
#[derive(Debug, Clone)]
pub struct DavListEntry {
    pub name: String,
    /// `None` makes the handler ask for the properties separately.
    pub props: Option<PropMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Shared,
    Exclusive,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Shared => "shared",
            LockScope::Exclusive => "exclusive",
        }
    }
}

/// The storage contract.
///
/// Paths are the relative, already validated request paths. The lock
/// methods have "fake" default implementations: every lock succeeds and
/// nothing is ever reported as locked. That is enough for macOS and Windows
/// clients that insist on locking.
pub trait DavStorage: Send + Sync {
    /// Content of a non-collection resource. `None` if it does not exist.
    fn get<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<DavContent>>;

    fn exists<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, bool>;

    /// Properties of a resource, `None` if it does not exist.
    ///
    /// `requested` is `None` when the client wants the default set.
    fn properties<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
        depth: u32,
    ) -> StoreFuture<'a, Option<PropMap>>;

    /// Apply a raw PROPPATCH body. The storage owns the semantics.
    fn set_properties<'a>(&'a self, path: &'a DavPath, body: &'a [u8]) -> StoreFuture<'a, ()> {
        let _ = (path, body);
        Box::pin(future::ready(Ok(())))
    }

    /// Store the body. Returns `true` if the resource was created.
    fn put<'a>(&'a self, path: &'a DavPath, body: PutStream<'a>) -> StoreFuture<'a, bool>;

    fn delete<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// Returns `true` if the destination was created.
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool>;

    /// Move a resource. Returns `true` if the destination was created.
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool>;

    fn mkcol<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// Direct members of a collection.
    fn list<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
    ) -> StoreFuture<'a, Vec<DavListEntry>>;

    /// Lock `path`, or refresh the lock `token` holds. A `deep` lock
    /// (`Depth: infinity`) also covers every member below `path`.
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        scope: LockScope,
        deep: bool,
    ) -> StoreFuture<'a, ()> {
        let _ = (path, token, scope, deep);
        Box::pin(future::ready(Ok(())))
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> StoreFuture<'a, ()> {
        let _ = (path, token);
        Box::pin(future::ready(Ok(())))
    }

    /// With a token: the scope of the lock that token holds on `path`, if any.
    /// Without: the scope of any lock on `path`.
    fn get_lock<'a>(
        &'a self,
        path: &'a DavPath,
        token: Option<&'a str>,
    ) -> StoreFuture<'a, Option<LockScope>> {
        let _ = path;
        // fake locking: any presented token is valid, nothing is locked.
        Box::pin(future::ready(Ok(token.map(|_| LockScope::Exclusive))))
    }

    /// Is a member strictly below `path` locked by a lock `token` does not
    /// hold. Deleting or moving `path` would take that lock with it.
    fn locked_below<'a>(
        &'a self,
        path: &'a DavPath,
        token: Option<&'a str>,
    ) -> StoreFuture<'a, bool> {
        let _ = (path, token);
        Box::pin(future::ready(Ok(false)))
    }
}
