//! Evaluation of `Lock-Token:`, `If:` and `If-Match:` / `If-None-Match:`.
//!
//! The storage decides what is locked; this module only decides whether
//! the tokens a request presents satisfy the lock state it reports.
use headers::HeaderMapExt;
use http::{HeaderMap, StatusCode};
use regex::Regex;

use crate::davheaders::{self, If, LockToken};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{DavStorage, PropName};
use crate::DavResult;

/// Token that never matches a lock.
pub(crate) const NO_LOCK: &str = "DAV:no-lock";

lazy_static! {
    // first "(<token>" of an If: list.
    static ref IF_TOKEN: Regex = Regex::new(r"\(\s*<([^>]*)>").unwrap();
    // a tagged list: "<resource> (<token>".
    static ref IF_TAGGED: Regex = Regex::new(r"<([^>]+)>\s*\(\s*<").unwrap();
}

/// The lock token a request presents, from `Lock-Token:` or else from `If:`.
pub(crate) fn lock_token(headers: &HeaderMap) -> Option<String> {
    if let Some(LockToken(token)) = headers.typed_get::<LockToken>() {
        return Some(token);
    }
    let If(value) = headers.typed_get::<If>()?;
    IF_TOKEN
        .captures(&value)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resource tagged in the `If:` header, resolved against the base URI.
fn if_tagged_resource(headers: &HeaderMap, prefix: &str) -> DavResult<Option<DavPath>> {
    let If(value) = match headers.typed_get::<If>() {
        Some(h) => h,
        None => return Ok(None),
    };
    let tag = match IF_TAGGED.captures(&value) {
        Some(c) => c[1].trim().to_string(),
        None => return Ok(None),
    };
    let path = match url::Url::parse(&tag) {
        Ok(url) => url.path().to_string(),
        Err(_) => tag,
    };
    DavPath::resolve(&path, prefix)
        .map(Some)
        .map_err(|_| DavError::bad_request("Invalid \"If\" header URI"))
}

/// Can the request modify `path`, given the lock state storage reports.
///
/// `token` overrides the token found in the headers.
pub(crate) async fn check_lock(
    store: &dyn DavStorage,
    headers: &HeaderMap,
    path: &DavPath,
    token: Option<&str>,
) -> DavResult<()> {
    let token = match token {
        Some(t) => Some(t.to_string()),
        None => lock_token(headers),
    };
    if token.as_deref() == Some(NO_LOCK) {
        return Err(DavError::locked("Resource is locked"));
    }

    // a client may prove a lock it holds on a parent collection.
    let root = match if_tagged_resource(headers, path.prefix())? {
        Some(root) => {
            if !root.is_ancestor_of(path) {
                return Err(DavError::bad_request("Invalid \"If\" header URI"));
            }
            root
        }
        None => path.clone(),
    };

    check_lock_on(store, &root, token.as_deref()).await
}

/// Like `check_lock`, without looking at the `If:` resource tag.
pub(crate) async fn check_lock_on(
    store: &dyn DavStorage,
    path: &DavPath,
    token: Option<&str>,
) -> DavResult<()> {
    match token {
        Some(NO_LOCK) => Err(DavError::locked("Resource is locked")),
        Some(token) => match store.get_lock(path, Some(token)).await? {
            Some(_) => Ok(()),
            None => {
                debug!("lock token {token} is not valid for {path}");
                Err(DavError::locked("Invalid lock token"))
            }
        },
        None => match store.get_lock(path, None).await? {
            Some(scope) => {
                debug!("{path} is locked ({})", scope.as_str());
                Err(DavError::locked("Resource is locked"))
            }
            None => Ok(()),
        },
    }
}

/// Refuse to remove `path` while a member below it carries a lock the
/// request does not hold.
pub(crate) async fn check_members(
    store: &dyn DavStorage,
    path: &DavPath,
    token: Option<&str>,
) -> DavResult<()> {
    if store.locked_below(path, token).await? {
        debug!("a member of {path} is locked");
        return Err(DavError::locked("A member of the resource is locked"));
    }
    Ok(())
}

/// Quote an etag, unless it already is.
pub(crate) fn quote_etag(etag: &str) -> String {
    if etag.starts_with('"') || etag.starts_with("W/\"") {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}

/// Evaluate `If-Match:` and `If-None-Match:` for a write to `path`.
pub(crate) async fn if_match(
    store: &dyn DavStorage,
    headers: &HeaderMap,
    path: &DavPath,
) -> DavResult<()> {
    let im = headers.typed_get::<headers::IfMatch>();
    let inm = headers.typed_get::<headers::IfNoneMatch>();
    if im.is_none() && inm.is_none() {
        return Ok(());
    }

    let req = [PropName::dav("getetag")];
    let props = store.properties(path, Some(&req[..]), 0).await?;
    let etag = props
        .as_ref()
        .and_then(|p| p.get(&req[0]))
        .and_then(|v| v.as_text())
        .and_then(|t| quote_etag(t).parse::<headers::ETag>().ok());

    let failed = || DavError::new(StatusCode::PRECONDITION_FAILED, "ETag did not match");

    if let Some(im) = im {
        let passes = match (&props, &etag) {
            (None, _) => false,
            (Some(_), Some(etag)) => im.precondition_passes(etag),
            (Some(_), None) => im == headers::IfMatch::any(),
        };
        if !passes {
            return Err(failed());
        }
    }
    if let Some(inm) = inm {
        if props.is_some() {
            let passes = match &etag {
                _ if inm == headers::IfNoneMatch::any() => false,
                Some(etag) => inm.precondition_passes(etag),
                None => true,
            };
            if !passes {
                return Err(failed());
            }
        }
    }
    Ok(())
}

/// `Depth:` of the request, if it is valid.
pub(crate) fn depth(headers: &HeaderMap) -> DavResult<Option<davheaders::Depth>> {
    headers
        .typed_try_get::<davheaders::Depth>()
        .map_err(|_| DavError::bad_request("Invalid Depth header"))
}
