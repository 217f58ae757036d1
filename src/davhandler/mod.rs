//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::davheaders;
use crate::davpath::{normalize_prefix, DavPath};
use crate::errors::DavError;
use crate::store::DavStorage;
use crate::util::{dav_method, dav_xml_error, DavMethod, DavMethodSet};
use crate::DavResult;

pub(crate) mod handle_copymove;
pub(crate) mod handle_delete;
pub(crate) mod handle_gethead;
use handle_gethead::READ_BUF_SIZE;
pub(crate) mod handle_lock;
pub(crate) mod handle_mkcol;
pub(crate) mod handle_options;
pub(crate) mod handle_props;
pub(crate) mod handle_put;

/// Largest request body read for methods other than PUT.
const MAX_XML_BODY: usize = 65536;

/// Lock timeout advertised in LOCK responses, in seconds.
const DEFAULT_LOCK_TIMEOUT: u64 = 300;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Storage backend.
    storage: Storage,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Does GET on a collection return an HTML index to browsers.
    autoindex: bool,
    /// read buffer size in bytes
    read_buf_size: usize,
    /// lock timeout in seconds
    lock_timeout: u64,
}

/// Storage backend.
#[derive(Clone)]
pub enum Storage {
    #[cfg(any(docsrs, feature = "memstore"))]
    Mem,
    #[cfg(any(docsrs, feature = "localstore"))]
    Local {
        /// Path to the root directory.
        base: PathBuf,
        public: bool,
    },
    Custom(Arc<dyn DavStorage>),
}

impl Storage {
    /// Serve a local directory
    #[cfg(any(docsrs, feature = "localstore"))]
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        Storage::Local {
            base: path.into(),
            public,
        }
    }

    /// Use your own [`DavStorage`] implementation.
    pub fn custom(store: impl DavStorage + 'static) -> Self {
        Storage::Custom(Arc::new(store))
    }

    fn build(self, lock_timeout: Duration) -> Arc<dyn DavStorage> {
        match self {
            #[cfg(any(docsrs, feature = "memstore"))]
            Storage::Mem => crate::store::MemStore::with_lock_timeout(Some(lock_timeout)),
            #[cfg(any(docsrs, feature = "localstore"))]
            Storage::Local { base, public } => {
                crate::store::LocalStore::with_lock_timeout(base, public, Some(lock_timeout))
            }
            Storage::Custom(store) => store,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(storage: Storage) -> DavBuilder {
        Self {
            prefix: String::new(),
            storage,
            allow: DavMethodSet::all(),
            autoindex: true,
            read_buf_size: READ_BUF_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a storage path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Does a GET on a collection produce an HTML index for browsers.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size.max(1);
        this
    }

    /// Lock timeout in seconds, advertised to clients and applied by the
    /// built-in storages.
    pub fn lock_timeout(self, secs: u64) -> Self {
        let mut this = self;
        this.lock_timeout = secs;
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` method is used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn DavStorage>,
    pub(crate) allow: DavMethodSet,
    pub(crate) autoindex: bool,
    pub(crate) read_buf_size: usize,
    pub(crate) lock_timeout: u64,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(normalize_prefix(&cfg.prefix)),
            store: cfg.storage.build(Duration::from_secs(cfg.lock_timeout)),
            allow: cfg.allow,
            autoindex: cfg.autoindex,
            read_buf_size: cfg.read_buf_size,
            lock_timeout: cfg.lock_timeout,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(storage: Storage) -> DavBuilder {
        DavBuilder::new(storage)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding the prefix for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(normalize_prefix(&prefix));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>> + Send,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>> + Send,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(normalize_prefix(&prefix));
        }
        this.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix)
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let is_head = req.method() == http::Method::HEAD;

        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let body = if is_head {
                    Body::empty()
                } else {
                    dav_xml_error(&err.message())
                };
                let mut resp = Response::new(body);
                *resp.status_mut() = err.statuscode();
                let h = resp.headers_mut();
                h.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/xml; charset=utf-8"),
                );
                if let DavError::RangeNotSatisfiable(len) = err {
                    h.typed_insert(headers::ContentRange::unsatisfied_bytes(len));
                }
                if err.must_close() {
                    h.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // debug when running the webdav litmus tests.
        if log_enabled!(log::Level::Debug) {
            if let Some(t) = req.headers().typed_get::<davheaders::XLitmus>() {
                debug!("X-Litmus: {:?}", t);
            }
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("Method {} is not allowed", req.method()),
            ));
        }

        // OPTIONS does not look at the path at all.
        if method == DavMethod::OPTIONS {
            debug!("== START REQUEST OPTIONS {}", req.uri());
            return self.handle_options();
        }

        // the base without its trailing slash.
        if !self.prefix.is_empty() && req.uri().path() == self.prefix.as_str() {
            let location = format!("{}/", self.prefix);
            debug!("redirecting {} to {location}", req.uri());
            let mut res = Response::new(Body::empty());
            *res.status_mut() = StatusCode::MOVED_PERMANENTLY;
            let location = HeaderValue::from_str(&location)
                .map_err(|_| DavError::bad_request("Invalid base URI"))?;
            res.headers_mut().insert(http::header::LOCATION, location);
            return Ok(res);
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::PUT => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, MAX_XML_BODY).await?),
        };

        // Not all methods accept a body.
        match method {
            DavMethod::PUT | DavMethod::PROPFIND | DavMethod::PROPPATCH | DavMethod::LOCK => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(DavError::new(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        format!("{} with a request body is not supported", req.method()),
                    ));
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::PROPFIND => self.handle_propfind(&req, &body_data).await,
            DavMethod::PROPPATCH => self.handle_proppatch(&req, &body_data).await,
            DavMethod::MKCOL => self.handle_mkcol(&req).await,
            DavMethod::DELETE => self.handle_delete(&req).await,
            DavMethod::LOCK => self.handle_lock(&req, &body_data).await,
            DavMethod::UNLOCK => self.handle_unlock(&req).await,
            DavMethod::HEAD | DavMethod::GET => self.handle_get(&req).await,
            DavMethod::COPY | DavMethod::MOVE => self.handle_copymove(&req, method).await,
            DavMethod::PUT => match body_strm {
                Some(body) => self.handle_put(&req, body).await,
                None => Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
            },
            _ => Err(DavError::UnknownDavMethod),
        }
    }
}
