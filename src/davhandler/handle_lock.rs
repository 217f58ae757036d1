use std::io::Write;

use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use regex::Regex;
use uuid::Uuid;
use xml::common::XmlVersion;
use xml::writer::{EventWriter, XmlEvent};
use xml::EmitterConfig;

use crate::body::Body;
use crate::conditional::{self, check_lock, lock_token};
use crate::davheaders::{Depth, If, LockToken};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{LockScope, NS_DAV_URI};
use crate::util::MemBuffer;
use crate::DavResult;

lazy_static! {
    static ref LOCKINFO: Regex = Regex::new(r"(?i)<(?:([A-Za-z_][\w.-]*):)?lockinfo[\s/>]").unwrap();
    static ref EXCLUSIVE: Regex = Regex::new(r"(?i)<(?:[A-Za-z_][\w.-]*:)?exclusive[\s/>]").unwrap();
    static ref SHARED: Regex = Regex::new(r"(?i)<(?:[A-Za-z_][\w.-]*:)?shared[\s/>]").unwrap();
    static ref OWNER: Regex =
        Regex::new(r"(?is)<(?:[A-Za-z_][\w.-]*:)?owner(?:\s[^>]*)?>(.*?)</(?:[A-Za-z_][\w.-]*:)?owner\s*>")
            .unwrap();
}

/// The namespace alias a client used for `DAV:` in its `lockinfo`.
///
/// Some clients only understand a LOCK response that uses the same alias
/// as their request, so the reply echoes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockAlias(String);

impl Default for LockAlias {
    fn default() -> Self {
        LockAlias("D".to_string())
    }
}

impl LockAlias {
    /// From a LOCK body. `None` if there is no `lockinfo` element.
    pub(crate) fn from_body(body: &str) -> Option<LockAlias> {
        let caps = LOCKINFO.captures(body)?;
        let alias = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        Some(LockAlias(alias.to_string()))
    }

    /// Qualified name of a `DAV:` element.
    pub(crate) fn name(&self, local: &str) -> String {
        if self.0.is_empty() {
            local.to_string()
        } else {
            format!("{}:{}", self.0, local)
        }
    }

    fn prefix(&self) -> &str {
        &self.0
    }
}

// What goes into the lockdiscovery response.
struct ActiveLock<'a> {
    scope: LockScope,
    depth: &'static str,
    owner: Option<&'a str>,
    timeout: u64,
    token: &'a str,
    root: &'a DavPath,
}

fn write_lockdiscovery(alias: &LockAlias, lock: &ActiveLock) -> DavResult<Vec<u8>> {
    let config = EmitterConfig::new()
        .perform_indent(false)
        .normalize_empty_elements(false);
    let mut xw = EventWriter::new_with_config(MemBuffer::new(), config);
    xw.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;

    let prop = alias.name("prop");
    let start = XmlEvent::start_element(prop.as_str());
    let start = if alias.prefix().is_empty() {
        start.default_ns(NS_DAV_URI)
    } else {
        start.ns(alias.prefix(), NS_DAV_URI)
    };
    xw.write(start)?;

    let open = |xw: &mut EventWriter<MemBuffer>, local: &str| -> DavResult<()> {
        let name = alias.name(local);
        xw.write(XmlEvent::start_element(name.as_str()))?;
        Ok(())
    };
    let close = |xw: &mut EventWriter<MemBuffer>| -> DavResult<()> {
        xw.write(XmlEvent::end_element())?;
        Ok(())
    };
    let text = |xw: &mut EventWriter<MemBuffer>, local: &str, text: &str| -> DavResult<()> {
        let name = alias.name(local);
        xw.write(XmlEvent::start_element(name.as_str()))?;
        xw.write(XmlEvent::characters(text))?;
        xw.write(XmlEvent::end_element())?;
        Ok(())
    };

    open(&mut xw, "lockdiscovery")?;
    open(&mut xw, "activelock")?;

    open(&mut xw, "lockscope")?;
    open(&mut xw, lock.scope.as_str())?;
    close(&mut xw)?;
    close(&mut xw)?;

    open(&mut xw, "locktype")?;
    open(&mut xw, "write")?;
    close(&mut xw)?;
    close(&mut xw)?;

    text(&mut xw, "depth", lock.depth)?;
    if let Some(owner) = lock.owner {
        open(&mut xw, "owner")?;
        xw.inner_mut().write_all(owner.as_bytes())?;
        close(&mut xw)?;
    }
    text(&mut xw, "timeout", &format!("Second-{}", lock.timeout))?;

    open(&mut xw, "locktoken")?;
    text(&mut xw, "href", lock.token)?;
    close(&mut xw)?;

    open(&mut xw, "lockroot")?;
    text(&mut xw, "href", &lock.root.as_url_string())?;
    close(&mut xw)?;

    close(&mut xw)?; // activelock
    close(&mut xw)?; // lockdiscovery
    close(&mut xw)?; // prop

    Ok(xw.into_inner().take().to_vec())
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let headers = req.headers();
        let path = self.path(req)?;
        let deep = !matches!(conditional::depth(headers), Ok(Some(Depth::Zero)));
        let body = std::str::from_utf8(xmldata)
            .map_err(|_| DavError::bad_request("LOCK body is not valid UTF-8"))?
            .trim();

        let (alias, token, scope, owner) = if !body.is_empty() {
            // new lock.
            if body.contains("<!DOCTYPE") {
                return Err(DavError::bad_request("DOCTYPE is not allowed in a LOCK body"));
            }
            let alias = LockAlias::from_body(body)
                .ok_or_else(|| DavError::bad_request("Missing lockinfo element"))?;
            let scope = if !EXCLUSIVE.is_match(body) && SHARED.is_match(body) {
                LockScope::Shared
            } else {
                LockScope::Exclusive
            };
            match self.store.get_lock(&path, None).await? {
                Some(LockScope::Exclusive) => {
                    return Err(DavError::locked("Resource is locked exclusively"))
                }
                Some(LockScope::Shared) if scope == LockScope::Exclusive => {
                    return Err(DavError::locked("Resource is locked"))
                }
                _ => {}
            }
            let token = format!("opaquelocktoken:{}", Uuid::new_v4().hyphenated());
            let owner = OWNER
                .captures(body)
                .map(|c| c[1].trim().to_string())
                .filter(|o| !o.is_empty());
            (alias, token, scope, owner)
        } else {
            // refresh.
            if headers.typed_get::<If>().is_none() {
                return Err(DavError::bad_request("LOCK refresh needs an If header"));
            }
            check_lock(&*self.store, headers, &path, None).await?;
            let token = lock_token(headers)
                .ok_or_else(|| DavError::bad_request("No lock token in If header"))?;
            let scope = self
                .store
                .get_lock(&path, Some(token.as_str()))
                .await?
                .unwrap_or(LockScope::Exclusive);
            (LockAlias::default(), token, scope, None)
        };

        self.store.lock(&path, &token, scope, deep).await?;
        debug!("lock {token} on {path} ({})", scope.as_str());

        let lock = ActiveLock {
            scope,
            depth: if deep { "infinity" } else { "0" },
            owner: owner.as_deref(),
            timeout: self.lock_timeout,
            token: &token,
            root: &path,
        };
        let body = write_lockdiscovery(&alias, &lock)?;

        let mut res = Response::new(Body::from(body));
        *res.status_mut() = StatusCode::OK;
        let h = res.headers_mut();
        h.typed_insert(LockToken(token.clone()));
        h.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let LockToken(token) = req
            .headers()
            .typed_get::<LockToken>()
            .ok_or_else(|| DavError::bad_request("Missing Lock-Token header"))?;
        let path = self.path(req)?;
        check_lock(&*self.store, req.headers(), &path, Some(token.as_str())).await?;
        self.store.unlock(&path, &token).await?;
        debug!("unlock {token} on {path}");

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
