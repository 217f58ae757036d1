use headers::HeaderMapExt;
use http::{HeaderValue, Response, StatusCode};

use crate::body::Body;
use crate::errors::DavError;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_options(&self) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();

        // Locking is advertised even if LOCK/UNLOCK are not allowed here,
        // another part of the URL space may well support it.
        h.insert("dav", HeaderValue::from_static("1, 2, 3"));
        h.insert("ms-author-via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::AcceptRanges::bytes());
        h.typed_insert(headers::ContentLength(0));

        let allow = DavMethod::ORDERED
            .iter()
            .filter(|(m, _)| self.allow.contains(*m))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let allow = HeaderValue::from_str(&allow)
            .map_err(|_| DavError::new(StatusCode::INTERNAL_SERVER_ERROR, "Invalid Allow header"))?;
        h.insert(http::header::ALLOW, allow);

        Ok(res)
    }
}
