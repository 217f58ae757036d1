//! Utility module to handle the path part of an URL as a resource path.
//!
//! A [`DavPath`] is always relative to the base URI the handler serves, it
//! never contains `..` and never contains empty segments.
use std::path::PathBuf;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;
use crate::DavResult;

// Characters that must be encoded in a path; '/' is kept as-is.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Path of a resource, relative to the base URI.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    rel: String,
    prefix: String,
    collection: bool,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.rel)?;
        if self.collection && !self.rel.is_empty() {
            f.write_str("/")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

// "/dav/" -> "/dav", "/" -> "", "dav" -> "/dav".
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let p = collapse_slashes(prefix.trim_end_matches('/'));
    if p.is_empty() || p.starts_with('/') {
        p
    } else {
        format!("/{p}")
    }
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

impl DavPath {
    /// Resolve a raw (still percent-encoded) request path against the base URI.
    pub(crate) fn resolve(raw: &str, base: &str) -> DavResult<DavPath> {
        let prefix = normalize_prefix(base);

        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| DavError::bad_request("Invalid URI encoding"))?;
        // a second encoding layer is a traversal attempt.
        if decoded.to_ascii_lowercase().contains("%2e%2e") {
            return Err(DavError::bad_request("Invalid URI"));
        }
        if decoded.contains("..") {
            return Err(DavError::bad_request("Invalid URI: path traversal is not allowed"));
        }
        let path = collapse_slashes(&decoded);

        let rest = match path.strip_prefix(prefix.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => {
                return Err(DavError::bad_request(format!(
                    "URI is not in base URI: {path}"
                )))
            }
        };

        let rel = rest.trim_start_matches('/');
        let collection = rel.is_empty() || rel.ends_with('/');
        Ok(DavPath {
            rel: rel.trim_end_matches('/').to_string(),
            prefix,
            collection,
        })
    }

    /// From the URI of a request.
    pub(crate) fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> DavResult<DavPath> {
        DavPath::resolve(uri.path(), prefix)
    }

    /// The root collection of a prefix.
    pub fn root(prefix: &str) -> DavPath {
        DavPath {
            rel: String::new(),
            prefix: normalize_prefix(prefix),
            collection: true,
        }
    }

    /// Relative path without leading or trailing slash. Empty for the root.
    pub fn as_rel_str(&self) -> &str {
        &self.rel
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_root(&self) -> bool {
        self.rel.is_empty()
    }

    /// Did the request name this path with a trailing slash.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn add_slash(&mut self) {
        self.collection = true;
    }

    /// Last path segment, empty for the root.
    pub fn file_name(&self) -> &str {
        self.rel.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> DavPath {
        let rel = match self.rel.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        DavPath {
            rel,
            prefix: self.prefix.clone(),
            collection: true,
        }
    }

    /// A member of this collection.
    pub fn join(&self, name: &str) -> DavPath {
        let name = name.trim_matches('/');
        let rel = if self.rel.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.rel, name)
        };
        DavPath {
            rel,
            prefix: self.prefix.clone(),
            collection: false,
        }
    }

    /// Is `other` this path, or below it.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        self.rel.is_empty()
            || other.rel == self.rel
            || (other.rel.starts_with(&self.rel) && other.rel[self.rel.len()..].starts_with('/'))
    }

    /// Full URL path including the prefix, percent-encoded.
    pub fn as_url_string(&self) -> String {
        let mut url = utf8_percent_encode(&self.prefix, PATH_ENCODE_SET).to_string();
        url.push('/');
        if !self.rel.is_empty() {
            url.push_str(&utf8_percent_encode(&self.rel, PATH_ENCODE_SET).to_string());
            if self.collection {
                url.push('/');
            }
        }
        url
    }

    /// As a relative filesystem path.
    pub fn as_rel_ospath(&self) -> PathBuf {
        self.rel.split('/').filter(|s| !s.is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn status(r: DavResult<DavPath>) -> StatusCode {
        r.unwrap_err().statuscode()
    }

    #[test]
    fn strips_prefix() {
        let p = DavPath::resolve("/dav/a/b.txt", "/dav/").unwrap();
        assert_eq!(p.as_rel_str(), "a/b.txt");
        assert!(!p.is_collection());
        assert_eq!(p.file_name(), "b.txt");
        assert_eq!(p.parent().as_rel_str(), "a");

        let p = DavPath::resolve("/dav/", "/dav").unwrap();
        assert!(p.is_root());
        assert!(p.is_collection());

        let p = DavPath::resolve("/dav", "/dav/").unwrap();
        assert!(p.is_root());
    }

    #[test]
    fn collapses_slashes() {
        let p = DavPath::resolve("/dav//a///b/", "/dav/").unwrap();
        assert_eq!(p.as_rel_str(), "a/b");
        assert!(p.is_collection());
        assert_eq!(p.as_url_string(), "/dav/a/b/");
    }

    #[test]
    fn rejects_bad_paths() {
        assert_eq!(status(DavPath::resolve("/other/a", "/dav/")), StatusCode::BAD_REQUEST);
        assert_eq!(status(DavPath::resolve("/davx/a", "/dav/")), StatusCode::BAD_REQUEST);
        assert_eq!(status(DavPath::resolve("/dav/../etc", "/dav/")), StatusCode::BAD_REQUEST);
        assert_eq!(status(DavPath::resolve("/dav/%2e%2e/etc", "/dav/")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(DavPath::resolve("/dav/%252e%252e/etc", "/dav/")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(DavPath::resolve("/dav/%ff", "/dav/")), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn never_returns_traversal_or_double_slash() {
        for raw in ["/", "//a//b", "/a/./b", "/x%2Fy", "/%20a/b%20/", "/a/b/c/"] {
            if let Ok(p) = DavPath::resolve(raw, "/") {
                assert!(!p.as_rel_str().contains(".."), "{raw}");
                assert!(!p.as_rel_str().contains("//"), "{raw}");
                assert!(!p.as_url_string().contains("//"), "{raw}");
            }
        }
    }

    #[test]
    fn url_encoding_roundtrip() {
        let p = DavPath::resolve("/dav/my%20dir/f%23%C3%A9.txt", "/dav").unwrap();
        assert_eq!(p.as_rel_str(), "my dir/f#é.txt");
        let url = p.as_url_string();
        assert_eq!(url, "/dav/my%20dir/f%23%C3%A9.txt");
        let back = DavPath::resolve(&url, "/dav").unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn join_and_ancestors() {
        let root = DavPath::root("/");
        let a = root.join("a");
        let ab = a.join("b");
        assert_eq!(ab.as_rel_str(), "a/b");
        assert!(root.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&a));
        assert!(!ab.is_ancestor_of(&a));
        assert!(!root.join("a2").is_ancestor_of(&ab));
        assert_eq!(ab.as_rel_ospath(), PathBuf::from("a").join("b"));
    }
}
