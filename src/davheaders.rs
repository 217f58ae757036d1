use std::fmt::Display;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref X_EXPECTED_ENTITY_LENGTH: HeaderName =
        HeaderName::from_static("x-expected-entity-length");
    static ref X_LITMUS: HeaderName = HeaderName::from_static("x-litmus");
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    Ok(v)
}

fn one_str<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    one(values)?
        .to_str()
        .map(|s| s.trim())
        .map_err(|_| headers::Error::invalid())
}

fn encode_str<E: Extend<HeaderValue>>(values: &mut E, s: impl Display) {
    if let Ok(v) = HeaderValue::from_str(&s.to_string()) {
        values.extend(std::iter::once(v));
    }
}

/// Depth: header. An empty value counts as `0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one_str(values)?.to_ascii_lowercase().as_str() {
            "" | "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Destination: header, as sent (absolute URL or absolute path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?;
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Destination(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// Overwrite: header. Only `T` enables overwriting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one_str(values)? {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Lock-Token: header. Angle brackets are stripped on decode and added on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?;
        let s = match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(inner) => inner.trim(),
            None => s,
        };
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(LockToken(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, format!("<{}>", self.0));
    }
}

/// If: header, unparsed. See `conditional` for the interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct If(pub String);

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            v.push(value.to_str().map_err(|_| headers::Error::invalid())?.trim());
        }
        if v.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(If(v.join(" ")))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// X-Expected-Entity-Length: sent by the macOS Finder instead of a body length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XExpectedEntityLength(pub String);

impl Header for XExpectedEntityLength {
    fn name() -> &'static HeaderName {
        &X_EXPECTED_ENTITY_LENGTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(XExpectedEntityLength(one_str(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// X-Litmus: header, sent by the litmus test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XLitmus(pub String);

impl Header for XLitmus {
    fn name() -> &'static HeaderName {
        &X_LITMUS
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(XLitmus(one_str(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// A single byte range, `bytes=A-B`. Either end may be missing.
///
/// Multiple ranges do not decode; the handler then serves the full body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Resolve against the content length into an inclusive `(start, end)`.
    ///
    /// `Err` means unsatisfiable (416). `len` is `None` when the storage could
    /// not tell the length up front; then only explicit ranges work.
    pub fn resolve(&self, len: Option<u64>) -> Result<Option<(u64, u64)>, ()> {
        match (self.start, self.end, len) {
            // suffix: the last `n` bytes.
            (None, Some(n), Some(len)) => {
                if n == 0 || len == 0 {
                    return Err(());
                }
                Ok(Some((len.saturating_sub(n), len - 1)))
            }
            (None, None, Some(_)) => Err(()),
            (None, _, None) => Ok(None),
            (Some(start), end, Some(len)) => {
                let end = end.unwrap_or(len.saturating_sub(1));
                if start >= len || end >= len || start > end {
                    return Err(());
                }
                Ok(Some((start, end)))
            }
            (Some(start), Some(end), None) => {
                if start > end {
                    return Err(());
                }
                Ok(Some((start, end)))
            }
            (Some(_), None, None) => Ok(None),
        }
    }
}

impl Header for ByteRange {
    fn name() -> &'static HeaderName {
        &http::header::RANGE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?;
        let spec = s
            .strip_prefix("bytes=")
            .ok_or_else(headers::Error::invalid)?
            .trim();
        if spec.contains(',') {
            return Err(headers::Error::invalid());
        }
        let (a, b) = spec.split_once('-').ok_or_else(headers::Error::invalid)?;
        let num = |s: &str| -> Result<Option<u64>, headers::Error> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<u64>().map(Some).map_err(|_| headers::Error::invalid())
            }
        };
        let range = ByteRange {
            start: num(a)?,
            end: num(b)?,
        };
        if range.start.is_none() && range.end.is_none() {
            return Err(headers::Error::invalid());
        }
        Ok(range)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let a = self.start.map(|n| n.to_string()).unwrap_or_default();
        let b = self.end.map(|n| n.to_string()).unwrap_or_default();
        encode_str(values, format!("bytes={a}-{b}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn map(name: &str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn depth() {
        assert_eq!(map("depth", "0").typed_get::<Depth>(), Some(Depth::Zero));
        assert_eq!(map("depth", "").typed_get::<Depth>(), Some(Depth::Zero));
        assert_eq!(map("depth", "Infinity").typed_get::<Depth>(), Some(Depth::Infinity));
        assert!(map("depth", "2").typed_try_get::<Depth>().is_err());
        assert_eq!(HeaderMap::new().typed_try_get::<Depth>().unwrap(), None);
    }

    #[test]
    fn lock_token() {
        let h = map("lock-token", "<opaquelocktoken:abc>");
        assert_eq!(
            h.typed_get::<LockToken>(),
            Some(LockToken("opaquelocktoken:abc".to_string()))
        );
        let mut out = HeaderMap::new();
        out.typed_insert(LockToken("opaquelocktoken:abc".to_string()));
        assert_eq!(out.get("lock-token").unwrap(), "<opaquelocktoken:abc>");
    }

    #[test]
    fn overwrite() {
        assert_eq!(map("overwrite", "T").typed_get::<Overwrite>(), Some(Overwrite(true)));
        assert_eq!(map("overwrite", "F").typed_get::<Overwrite>(), Some(Overwrite(false)));
        assert_eq!(map("overwrite", "yes").typed_get::<Overwrite>(), None);
    }

    #[test]
    fn byte_range_parse() {
        let r = map("range", "bytes=0-0").typed_get::<ByteRange>().unwrap();
        assert_eq!(r, ByteRange { start: Some(0), end: Some(0) });
        let r = map("range", "bytes=-5").typed_get::<ByteRange>().unwrap();
        assert_eq!(r, ByteRange { start: None, end: Some(5) });
        let r = map("range", "bytes=10-").typed_get::<ByteRange>().unwrap();
        assert_eq!(r, ByteRange { start: Some(10), end: None });
        assert!(map("range", "bytes=0-1,4-5").typed_get::<ByteRange>().is_none());
        assert!(map("range", "items=0-1").typed_get::<ByteRange>().is_none());
        assert!(map("range", "bytes=-").typed_get::<ByteRange>().is_none());
    }

    #[test]
    fn byte_range_resolve() {
        let r = |start, end| ByteRange { start, end };
        assert_eq!(r(Some(0), Some(0)).resolve(Some(10)), Ok(Some((0, 0))));
        assert_eq!(r(Some(2), None).resolve(Some(10)), Ok(Some((2, 9))));
        assert_eq!(r(None, Some(3)).resolve(Some(10)), Ok(Some((7, 9))));
        assert_eq!(r(None, Some(30)).resolve(Some(10)), Ok(Some((0, 9))));
        assert_eq!(r(Some(10), None).resolve(Some(10)), Err(()));
        assert_eq!(r(Some(0), Some(10)).resolve(Some(10)), Err(()));
        assert_eq!(r(Some(5), Some(2)).resolve(Some(10)), Err(()));
        assert_eq!(r(None, Some(3)).resolve(None), Ok(None));
        assert_eq!(r(None, None).resolve(Some(10)), Err(()));
        assert_eq!(r(Some(1), Some(3)).resolve(None), Ok(Some((1, 3))));
    }
}
