use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::store::StoreError;

pub(crate) type DavResult<T> = Result<T, DavError>;

/// The one error type every handler returns.
///
/// `Status` is the plain "protocol error": a status code plus a message
/// that ends up in the `<s:message>` element of the error body.
#[derive(Debug)]
pub(crate) enum DavError {
    Status(StatusCode, String),
    StatusClose(StatusCode),
    RangeNotSatisfiable(u64),
    UnknownDavMethod,
    Store(StoreError),
    IoError(io::Error),
    XmlWriteError(xml::writer::Error),
}

impl DavError {
    pub(crate) fn new(code: StatusCode, msg: impl Into<String>) -> DavError {
        DavError::Status(code, msg.into())
    }

    pub(crate) fn bad_request(msg: impl Into<String>) -> DavError {
        DavError::new(StatusCode::BAD_REQUEST, msg)
    }

    pub(crate) fn locked(msg: impl Into<String>) -> DavError {
        DavError::new(StatusCode::LOCKED, msg)
    }

    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::Status(s, _) => *s,
            DavError::StatusClose(s) => *s,
            DavError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            DavError::UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Store(e) => e.statuscode(),
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::XmlWriteError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        matches!(
            self,
            DavError::StatusClose(_) | DavError::UnknownDavMethod | DavError::IoError(_)
        )
    }

    /// Text for the `<s:message>` element.
    pub(crate) fn message(&self) -> String {
        match self {
            DavError::Status(_, msg) if !msg.is_empty() => msg.clone(),
            DavError::Status(s, _) | DavError::StatusClose(s) => {
                s.canonical_reason().unwrap_or("Error").to_string()
            }
            DavError::RangeNotSatisfiable(_) => "Requested range is not satisfiable".to_string(),
            DavError::UnknownDavMethod => "Method not allowed".to_string(),
            DavError::Store(e) => e.to_string(),
            DavError::IoError(_) | DavError::XmlWriteError(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::Store(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlWriteError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DavError::Status(s, msg) => write!(f, "{s}: {msg}"),
            DavError::StatusClose(s) => write!(f, "{s}"),
            DavError::RangeNotSatisfiable(len) => write!(f, "range not satisfiable (length {len})"),
            DavError::UnknownDavMethod => write!(f, "unknown webdav method"),
            DavError::Store(e) => write!(f, "storage error: {e}"),
            DavError::IoError(e) => write!(f, "I/O error: {e}"),
            DavError::XmlWriteError(e) => write!(f, "XML write error: {e}"),
        }
    }
}

impl From<StatusCode> for DavError {
    fn from(s: StatusCode) -> Self {
        DavError::Status(s, String::new())
    }
}

impl From<StoreError> for DavError {
    fn from(e: StoreError) -> Self {
        DavError::Store(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriteError(e)
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            DavError::Store(StoreError::Io(e)) => e,
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
