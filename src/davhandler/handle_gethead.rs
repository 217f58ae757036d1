use std::io::{self, SeekFrom, Write};

use async_stream::try_stream;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::body::Body;
use crate::conditional::quote_etag;
use crate::davheaders::ByteRange;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{is_collection, DavContent, PropName, PropValue};
use crate::DavResult;

pub(crate) const READ_BUF_SIZE: usize = 8192;

const GZIP_LEVEL: u32 = 9;

const BASE_PROPERTIES: [&str; 5] = [
    "getlastmodified",
    "getetag",
    "resourcetype",
    "getcontenttype",
    "getcontentlength",
];

fn wants_gzip(req: &Request<()>) -> bool {
    req.headers()
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("gzip"))
}

fn wants_html(req: &Request<()>) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("html"))
        .unwrap_or(false)
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL));
    enc.write_all(data)?;
    enc.finish()
}

// Read `count` bytes (or everything) in chunks, gzipping on the fly.
fn read_stream<R>(
    mut reader: R,
    count: Option<u64>,
    bufsize: usize,
    compress: bool,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    try_stream! {
        let mut remaining = count;
        let mut buf = vec![0u8; bufsize];
        let mut encoder = if compress {
            Some(GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL)))
        } else {
            None
        };
        loop {
            let want = match remaining {
                Some(0) => break,
                Some(r) => r.min(bufsize as u64) as usize,
                None => bufsize,
            };
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            if let Some(r) = remaining.as_mut() {
                *r -= n as u64;
            }
            match encoder.as_mut() {
                Some(enc) => {
                    enc.write_all(&buf[..n])?;
                    let out = std::mem::take(enc.get_mut());
                    if !out.is_empty() {
                        yield Bytes::from(out);
                    }
                }
                None => {
                    yield Bytes::copy_from_slice(&buf[..n]);
                }
            }
        }
        if let Some(enc) = encoder {
            let out = enc.finish()?;
            if !out.is_empty() {
                yield Bytes::from(out);
            }
        }
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let head = req.method() == http::Method::HEAD;
        let path = self.path(req)?;

        let requested: Vec<PropName> = BASE_PROPERTIES.iter().map(|p| PropName::dav(p)).collect();
        let props = self
            .store
            .properties(&path, Some(&requested), 0)
            .await?
            .ok_or_else(|| DavError::new(StatusCode::NOT_FOUND, "Resource not found"))?;

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        match props.get(&PropName::dav("getlastmodified")) {
            Some(PropValue::Date(t)) => h.typed_insert(headers::LastModified::from(*t)),
            Some(PropValue::Text(t)) => {
                if let Ok(v) = HeaderValue::from_str(t) {
                    h.insert(header::LAST_MODIFIED, v);
                }
            }
            _ => {}
        }
        if let Some(etag) = props.get(&PropName::dav("getetag")).and_then(|v| v.as_text()) {
            if let Ok(v) = HeaderValue::from_str(&quote_etag(etag)) {
                h.insert(header::ETAG, v);
            }
        }

        if is_collection(&props) {
            return self.handle_get_collection(req, path, res, head).await;
        }

        let content_type = props
            .get(&PropName::dav("getcontenttype"))
            .and_then(|v| v.as_text())
            .and_then(|t| HeaderValue::from_str(t).ok())
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
        h.insert(header::CONTENT_TYPE, content_type);
        h.typed_insert(headers::AcceptRanges::bytes());
        let prop_len = props
            .get(&PropName::dav("getcontentlength"))
            .and_then(|v| v.as_text())
            .and_then(|t| t.parse::<u64>().ok());

        if head {
            if let Some(len) = prop_len {
                h.typed_insert(headers::ContentLength(len));
            }
            return Ok(res);
        }

        let content = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| DavError::new(StatusCode::NOT_FOUND, "Resource not found"))?;

        // open the content and find out how long it is.
        enum Source {
            Bytes(Bytes),
            File(tokio::fs::File),
            Reader(Box<dyn AsyncRead + Send + Unpin>),
        }
        let (len, source) = match content {
            DavContent::Bytes(b) => (Some(b.len() as u64), Source::Bytes(b)),
            DavContent::Path(p) => {
                let file = tokio::fs::File::open(&p).await?;
                let len = file.metadata().await?.len();
                (Some(len), Source::File(file))
            }
            DavContent::Stream(r) => (prop_len, Source::Reader(r)),
        };

        let range = match req.headers().typed_get::<ByteRange>() {
            Some(r) => match r.resolve(len) {
                Ok(range) => range,
                Err(()) => return Err(DavError::RangeNotSatisfiable(len.unwrap_or(0))),
            },
            None => None,
        };
        if let Some((start, end)) = range {
            debug!("range {start}-{end} of {path}");
            let cr = headers::ContentRange::bytes(start..=end, len)
                .map_err(|_| DavError::RangeNotSatisfiable(len.unwrap_or(0)))?;
            let h = res.headers_mut();
            h.typed_insert(cr);
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        }
        let (start, count) = match range {
            Some((start, end)) => (start, Some(end - start + 1)),
            None => (0, len),
        };

        let compress = wants_gzip(req);
        if compress {
            res.headers_mut()
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let body = match source {
            Source::Bytes(b) => {
                let end = match count {
                    Some(count) => (start + count) as usize,
                    None => b.len(),
                };
                let slice = b.slice(start as usize..end);
                let data = if compress { Bytes::from(gzip(&slice)?) } else { slice };
                res.headers_mut()
                    .typed_insert(headers::ContentLength(data.len() as u64));
                Body::from(data)
            }
            Source::File(mut file) => {
                if start > 0 {
                    file.seek(SeekFrom::Start(start)).await?;
                }
                if let (Some(count), false) = (count, compress) {
                    res.headers_mut().typed_insert(headers::ContentLength(count));
                }
                Body::stream(read_stream(file, count, self.read_buf_size, compress))
            }
            Source::Reader(mut reader) => {
                if start > 0 {
                    let skipped =
                        tokio::io::copy(&mut (&mut reader).take(start), &mut tokio::io::sink())
                            .await?;
                    if skipped < start {
                        return Err(DavError::RangeNotSatisfiable(skipped));
                    }
                }
                if let (Some(count), false) = (count, compress) {
                    res.headers_mut().typed_insert(headers::ContentLength(count));
                }
                Body::stream(read_stream(reader, count, self.read_buf_size, compress))
            }
        };
        *res.body_mut() = body;
        Ok(res)
    }

    async fn handle_get_collection(
        &self,
        req: &Request<()>,
        path: DavPath,
        mut res: Response<Body>,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let html = self.autoindex && wants_html(req);
        let content_type = if html {
            "text/html; charset=utf-8"
        } else {
            "text/plain; charset=utf-8"
        };
        res.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        if head {
            return Ok(res);
        }

        let mut dir = path;
        dir.add_slash();
        let mut names = Vec::new();
        for entry in self.store.list(&dir, None).await? {
            let collection = entry.props.as_ref().map(is_collection).unwrap_or(false);
            if collection {
                names.push(format!("{}/", entry.name));
            } else {
                names.push(entry.name);
            }
        }

        let body = if html {
            let title = htmlescape::encode_minimal(&dir.to_string());
            let mut w = String::new();
            w.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
            w.push_str(&format!("<title>Index of {title}</title></head>\n"));
            w.push_str(&format!("<body><h1>Index of {title}</h1>\n<ul>\n"));
            if !dir.is_root() {
                w.push_str("<li><a href=\"../\">../</a></li>\n");
            }
            for name in &names {
                let mut child = dir.join(name);
                if name.ends_with('/') {
                    child.add_slash();
                }
                w.push_str(&format!(
                    "<li><a href=\"{}\">{}</a></li>\n",
                    htmlescape::encode_attribute(&child.as_url_string()),
                    htmlescape::encode_minimal(name),
                ));
            }
            w.push_str("</ul></body></html>\n");
            w
        } else if names.is_empty() {
            "This collection is empty.\n".to_string()
        } else {
            names.join("\n") + "\n"
        };

        res.headers_mut()
            .typed_insert(headers::ContentLength(body.len() as u64));
        *res.body_mut() = Body::from(body);
        Ok(res)
    }
}
