use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use http::method::InvalidMethod;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::body::Body;
use crate::errors::DavError;
use crate::DavResult;

/// Namespace of the `<s:message>` element in error bodies.
pub(crate) const NS_SABREDAV_URI: &str = "http://sabredav.org/ns";

bitflags! {
    /// A webdav method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
    }
}

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();

    // In the order they are listed in the Allow: header.
    pub(crate) const ORDERED: [(DavMethod, &'static str); 12] = [
        (DavMethod::OPTIONS, "OPTIONS"),
        (DavMethod::GET, "GET"),
        (DavMethod::HEAD, "HEAD"),
        (DavMethod::PUT, "PUT"),
        (DavMethod::DELETE, "DELETE"),
        (DavMethod::COPY, "COPY"),
        (DavMethod::MOVE, "MOVE"),
        (DavMethod::MKCOL, "MKCOL"),
        (DavMethod::PROPFIND, "PROPFIND"),
        (DavMethod::PROPPATCH, "PROPPATCH"),
        (DavMethod::LOCK, "LOCK"),
        (DavMethod::UNLOCK, "UNLOCK"),
    ];
}

/// A set of allowed [`DavMethod`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DavMethodSet(DavMethod);

impl DavMethodSet {
    pub const HTTP_RO: DavMethodSet = DavMethodSet(DavMethod::HTTP_RO);
    pub const HTTP_RW: DavMethodSet = DavMethodSet(DavMethod::HTTP_RW);
    pub const WEBDAV_RO: DavMethodSet = DavMethodSet(DavMethod::WEBDAV_RO);
    pub const WEBDAV_RW: DavMethodSet = DavMethodSet(DavMethod::WEBDAV_RW);

    /// New set, all methods allowed.
    pub fn all() -> DavMethodSet {
        DavMethodSet(DavMethod::all())
    }

    /// New empty set.
    pub fn none() -> DavMethodSet {
        DavMethodSet(DavMethod::empty())
    }

    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0.insert(m);
        self
    }

    pub fn remove(&mut self, m: DavMethod) -> &Self {
        self.0.remove(m);
        self
    }

    pub fn contains(&self, m: DavMethod) -> bool {
        self.0.contains(m)
    }

    /// Generate a DavMethodSet from a list of words.
    pub fn from_vec(v: Vec<impl AsRef<str>>) -> Result<DavMethodSet, InvalidMethod> {
        let mut m = DavMethod::empty();
        for w in &v {
            m |= match w.as_ref().to_lowercase().as_str() {
                "head" => DavMethod::HEAD,
                "get" => DavMethod::GET,
                "put" => DavMethod::PUT,
                "delete" => DavMethod::DELETE,
                "options" => DavMethod::OPTIONS,
                "propfind" => DavMethod::PROPFIND,
                "proppatch" => DavMethod::PROPPATCH,
                "mkcol" => DavMethod::MKCOL,
                "copy" => DavMethod::COPY,
                "move" => DavMethod::MOVE,
                "lock" => DavMethod::LOCK,
                "unlock" => DavMethod::UNLOCK,
                "http-ro" => DavMethod::HTTP_RO,
                "http-rw" => DavMethod::HTTP_RW,
                "webdav-ro" => DavMethod::WEBDAV_RO,
                "webdav-rw" => DavMethod::WEBDAV_RW,
                _ => {
                    // A trick to get at the value of http::method::InvalidMethod.
                    let invalid_method = http::method::Method::from_bytes(b"").unwrap_err();
                    return Err(invalid_method);
                }
            };
        }
        Ok(DavMethodSet(m))
    }
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            http::method::Method::from_bytes(b"").unwrap_err()
        })
    }
}

/// The XML body of an error response.
pub(crate) fn dav_xml_error(message: &str) -> Body {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
        <d:error xmlns:d=\"DAV:\" xmlns:s=\"{NS_SABREDAV_URI}\">\n\
        \t<s:message>{}</s:message>\n\
        </d:error>\n",
        htmlescape::encode_minimal(message)
    );
    Body::from(xml)
}

pub(crate) fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
            .to_offset(offset!(UTC)),
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

/// RFC 7231 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

// A buffer that implements "Write".
#[derive(Clone)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
