use std::error::Error as StdError;
use std::io;

use bytes::{Buf, Bytes};
use headers::HeaderMapExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional::{check_lock, if_match, quote_etag};
use crate::davheaders::XExpectedEntityLength;
use crate::errors::DavError;
use crate::store::{PropName, PutStream};
use crate::DavResult;

// Turn the request body into the stream a storage consumes.
fn body_stream<'a, ReqBody, ReqData, ReqError>(body: ReqBody) -> PutStream<'a>
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'a,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    Box::pin(async_stream::stream! {
        pin_utils::pin_mut!(body);
        while let Some(data) = body.data().await {
            match data {
                Ok(mut buf) => {
                    let bytes = buf.copy_to_bytes(buf.remaining());
                    if !bytes.is_empty() {
                        yield Ok::<Bytes, io::Error>(bytes);
                    }
                }
                Err(e) => {
                    yield Err(io::Error::new(io::ErrorKind::UnexpectedEof, e));
                    break;
                }
            }
        }
    })
}

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let headers = req.headers();
        let path = self.path(req)?;

        if let Some(ct) = headers.get(header::CONTENT_TYPE) {
            if ct.as_bytes().starts_with(b"multipart/") {
                return Err(DavError::new(
                    StatusCode::NOT_IMPLEMENTED,
                    "Multipart PUT is not supported",
                ));
            }
        }
        if headers.contains_key(header::CONTENT_ENCODING) {
            return Err(DavError::new(
                StatusCode::NOT_IMPLEMENTED,
                "Content-Encoding on PUT is not supported",
            ));
        }
        if headers.contains_key(header::CONTENT_RANGE) {
            return Err(DavError::new(
                StatusCode::NOT_IMPLEMENTED,
                "Partial PUT is not supported",
            ));
        }
        // the finder sends this on a chunked PUT it cannot do atomically.
        if headers.typed_get::<XExpectedEntityLength>().is_some() {
            return Err(DavError::new(
                StatusCode::FORBIDDEN,
                "X-Expected-Entity-Length is not supported",
            ));
        }

        if_match(&*self.store, headers, &path).await?;
        check_lock(&*self.store, headers, &path, None).await?;

        let created = self.store.put(&path, body_stream(body)).await?;
        debug!("put {path} created={created}");

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };

        let req_props = [PropName::dav("getetag")];
        if let Ok(Some(props)) = self.store.properties(&path, Some(&req_props[..]), 0).await {
            let etag = props.get(&req_props[0]).and_then(|v| v.as_text());
            if let Some(v) = etag.and_then(|e| HeaderValue::from_str(&quote_etag(e)).ok()) {
                res.headers_mut().insert(header::ETAG, v);
            }
        }
        Ok(res)
    }
}
