//! Simple in-memory storage.
//!
//! This implementation has state. If you create a new instance in your
//! handler every time, you will get a new, empty store every time. Create
//! it once and share the `Arc` between handlers.
//!
//! Dead properties set through PROPPATCH are kept per resource and travel
//! along with COPY and MOVE.
use std::collections::BTreeMap;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, StreamExt};
use http::StatusCode;
use parking_lot::Mutex;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::store::memls::{covers, MemLs};
use crate::store::*;
use crate::xmltree_ext::ElementExt;

static ETAG_SEQ: AtomicU64 = AtomicU64::new(1);

const SUPPORTED_LOCK: &str = "<d:lockentry><d:lockscope><d:exclusive/></d:lockscope>\
    <d:locktype><d:write/></d:locktype></d:lockentry>\
    <d:lockentry><d:lockscope><d:shared/></d:lockscope>\
    <d:locktype><d:write/></d:locktype></d:lockentry>";

/// Ephemeral in-memory storage.
pub struct MemStore {
    tree: Mutex<BTreeMap<String, MemNode>>,
    locks: MemLs,
}

#[derive(Debug, Clone)]
struct MemNode {
    // `None` for a collection.
    data: Option<Bytes>,
    created: SystemTime,
    modified: SystemTime,
    etag: String,
    props: PropMap,
}

fn new_etag(len: usize, t: SystemTime) -> String {
    let t = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default();
    let seq = ETAG_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{seq:x}-{len:x}-{t:x}")
}

fn parent_rel(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn base_name(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

// value of a dead property, from its PROPPATCH element.
fn dead_value(elem: &Element) -> PropValue {
    if elem.child_elems().next().is_some() {
        return PropValue::Xml {
            attributes: Vec::new(),
            xml: elem.inner_xml(),
        };
    }
    let text = elem.text_content();
    if text.is_empty() {
        PropValue::Empty
    } else {
        PropValue::Text(text)
    }
}

impl MemNode {
    fn new(data: Option<Bytes>) -> MemNode {
        let now = SystemTime::now();
        let len = data.as_ref().map(|d| d.len()).unwrap_or_default();
        MemNode {
            data,
            created: now,
            modified: now,
            etag: new_etag(len, now),
            props: PropMap::new(),
        }
    }

    fn is_collection(&self) -> bool {
        self.data.is_none()
    }

    // live properties, then the dead ones.
    fn properties(&self, name: &str) -> PropMap {
        let mut props = PropMap::new();
        match &self.data {
            None => {
                props.insert(PropName::dav("resourcetype"), "collection".into());
            }
            Some(data) => {
                props.insert(PropName::dav("resourcetype"), PropValue::Empty);
                let mime = mime_guess::from_path(name).first_or_octet_stream();
                props.insert(PropName::dav("getcontenttype"), mime.to_string().into());
                props.insert(PropName::dav("getcontentlength"), data.len().to_string().into());
            }
        }
        if !name.is_empty() {
            props.insert(PropName::dav("displayname"), name.into());
        }
        props.insert(PropName::dav("getlastmodified"), self.modified.into());
        props.insert(PropName::dav("creationdate"), self.created.into());
        props.insert(PropName::dav("getetag"), self.etag.clone().into());
        props.insert(
            PropName::dav("supportedlock"),
            PropValue::Xml {
                attributes: Vec::new(),
                xml: SUPPORTED_LOCK.to_string(),
            },
        );
        for (k, v) in &self.props {
            props.entry(k.clone()).or_insert_with(|| v.clone());
        }
        props
    }
}

impl MemStore {
    /// Create a new, empty store. Locks expire after 300 seconds.
    pub fn new() -> Arc<MemStore> {
        MemStore::with_lock_timeout(Some(Duration::from_secs(300)))
    }

    /// Create a new, empty store whose locks expire after `timeout`.
    pub fn with_lock_timeout(timeout: Option<Duration>) -> Arc<MemStore> {
        let mut tree = BTreeMap::new();
        tree.insert(String::new(), MemNode::new(None));
        Arc::new(MemStore {
            tree: Mutex::new(tree),
            locks: MemLs::new(timeout),
        })
    }

    fn check_parent(tree: &BTreeMap<String, MemNode>, rel: &str) -> StoreResult<()> {
        match tree.get(parent_rel(rel)) {
            Some(node) if node.is_collection() => Ok(()),
            _ => Err(StoreError::Conflict),
        }
    }

    fn copy_tree(tree: &mut BTreeMap<String, MemNode>, from: &str, to: &str) -> StoreResult<bool> {
        if from.is_empty() || to.is_empty() {
            return Err(StoreError::Forbidden);
        }
        if !tree.contains_key(from) {
            return Err(StoreError::NotFound);
        }
        Self::check_parent(tree, to)?;
        let created = !tree.contains_key(to);

        let nodes: Vec<(String, MemNode)> = tree
            .iter()
            .filter(|(k, _)| covers(from, k))
            .map(|(k, node)| (format!("{}{}", to, &k[from.len()..]), node.clone()))
            .collect();
        tree.retain(|k, _| !covers(to, k));
        for (k, mut node) in nodes {
            let len = node.data.as_ref().map(|d| d.len()).unwrap_or_default();
            node.etag = new_etag(len, SystemTime::now());
            tree.insert(k, node);
        }
        Ok(created)
    }
}

impl DavStorage for MemStore {
    fn get<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<DavContent>> {
        async move {
            trace!("MemStore: get {path}");
            let tree = self.tree.lock();
            Ok(tree
                .get(path.as_rel_str())
                .and_then(|n| n.data.clone())
                .map(DavContent::Bytes))
        }
        .boxed()
    }

    fn exists<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, bool> {
        let exists = self.tree.lock().contains_key(path.as_rel_str());
        Box::pin(future::ready(Ok(exists)))
    }

    fn properties<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
        _depth: u32,
    ) -> StoreFuture<'a, Option<PropMap>> {
        async move {
            trace!("MemStore: properties {path}");
            let tree = self.tree.lock();
            Ok(tree
                .get(path.as_rel_str())
                .map(|n| select_properties(n.properties(path.file_name()), requested)))
        }
        .boxed()
    }

    fn set_properties<'a>(&'a self, path: &'a DavPath, body: &'a [u8]) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: set_properties {path}");
            let invalid = || {
                StoreError::Status(StatusCode::BAD_REQUEST, "Invalid PROPPATCH body".to_string())
            };
            let root = Element::parse_tolerant(body).ok_or_else(invalid)?;
            if root.name != "propertyupdate" {
                return Err(invalid());
            }

            let mut tree = self.tree.lock();
            let node = tree
                .get_mut(path.as_rel_str())
                .ok_or(StoreError::NotFound)?;
            for op in root.child_elems() {
                let set = match op.name.as_str() {
                    "set" => true,
                    "remove" => false,
                    _ => continue,
                };
                for prop in op.child_elems().filter(|e| e.name == "prop") {
                    for elem in prop.child_elems() {
                        let name = elem.prop_name();
                        if name.ns == NS_DAV_URI {
                            debug!("MemStore: not changing protected property {name}");
                            continue;
                        }
                        if set {
                            node.props.insert(name, dead_value(elem));
                        } else {
                            node.props.remove(&name);
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn put<'a>(&'a self, path: &'a DavPath, mut body: PutStream<'a>) -> StoreFuture<'a, bool> {
        async move {
            trace!("MemStore: put {path}");
            let rel = path.as_rel_str();
            let not_allowed =
                || StoreError::Status(StatusCode::METHOD_NOT_ALLOWED, "Cannot PUT to a collection".to_string());
            {
                let tree = self.tree.lock();
                if matches!(tree.get(rel), Some(n) if n.is_collection()) {
                    return Err(not_allowed());
                }
                Self::check_parent(&tree, rel)?;
            }

            let mut buf = BytesMut::new();
            while let Some(chunk) = body.next().await {
                buf.extend_from_slice(&chunk?);
            }
            let data = buf.freeze();

            // the tree may have changed while the body was read.
            let mut tree = self.tree.lock();
            Self::check_parent(&tree, rel)?;
            match tree.get_mut(rel) {
                Some(node) if node.is_collection() => Err(not_allowed()),
                Some(node) => {
                    let now = SystemTime::now();
                    node.etag = new_etag(data.len(), now);
                    node.modified = now;
                    node.data = Some(data);
                    Ok(false)
                }
                None => {
                    tree.insert(rel.to_string(), MemNode::new(Some(data)));
                    Ok(true)
                }
            }
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: delete {path}");
            let rel = path.as_rel_str();
            if rel.is_empty() {
                return Err(StoreError::Forbidden);
            }
            {
                let mut tree = self.tree.lock();
                if !tree.contains_key(rel) {
                    return Err(StoreError::NotFound);
                }
                tree.retain(|k, _| !covers(rel, k));
            }
            self.locks.remove_below(path);
            Ok(())
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool> {
        async move {
            trace!("MemStore: copy {from} {to}");
            let mut tree = self.tree.lock();
            Self::copy_tree(&mut tree, from.as_rel_str(), to.as_rel_str())
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool> {
        async move {
            trace!("MemStore: rename {from} {to}");
            let (from_rel, to_rel) = (from.as_rel_str(), to.as_rel_str());
            let created = {
                let mut tree = self.tree.lock();
                let created = Self::copy_tree(&mut tree, from_rel, to_rel)?;
                if !covers(to_rel, from_rel) {
                    tree.retain(|k, _| !covers(from_rel, k));
                }
                created
            };
            self.locks.remove_below(from);
            Ok(created)
        }
        .boxed()
    }

    fn mkcol<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("MemStore: mkcol {path}");
            let rel = path.as_rel_str();
            let mut tree = self.tree.lock();
            if tree.contains_key(rel) {
                return Err(StoreError::Exists);
            }
            Self::check_parent(&tree, rel)?;
            tree.insert(rel.to_string(), MemNode::new(None));
            Ok(())
        }
        .boxed()
    }

    fn list<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
    ) -> StoreFuture<'a, Vec<DavListEntry>> {
        async move {
            trace!("MemStore: list {path}");
            let rel = path.as_rel_str();
            let tree = self.tree.lock();
            match tree.get(rel) {
                Some(node) if node.is_collection() => {}
                Some(_) => return Ok(Vec::new()),
                None => return Err(StoreError::NotFound),
            }
            let entries = tree
                .iter()
                .filter(|(k, _)| !k.is_empty() && k.as_str() != rel && parent_rel(k) == rel)
                .map(|(k, node)| {
                    let name = base_name(k);
                    DavListEntry {
                        name: name.to_string(),
                        props: Some(select_properties(node.properties(name), requested)),
                    }
                })
                .collect();
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
