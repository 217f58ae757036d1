use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderMap, Request, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::store::{DavContent, DavListEntry, DavStorage, MemStore, PutStream, StoreFuture};
use crate::{PropMap, PropName};
use crate::{DavHandler, DavMethod, DavMethodSet, Storage};

const LOCKINFO_EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:tester@example.com</D:href></D:owner>
</D:lockinfo>"#;

const LOCKINFO_SHARED: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn server() -> DavHandler {
    let _ = env_logger::builder().is_test(true).try_init();
    DavHandler::builder(Storage::Mem).strip_prefix("/dav").build()
}

async fn send(dav: &DavHandler, method: &str, uri: &str, hdrs: &[(&str, &str)], body: &str) -> Reply {
    let mut req = Request::builder().method(method).uri(uri);
    for (k, v) in hdrs {
        req = req.header(*k, *v);
    }
    let req = req.body(Body::from(body.to_string())).unwrap();
    let resp = dav.handle(req).await;
    let (parts, body) = resp.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: body.into_bytes().await.unwrap(),
    }
}

async fn put(dav: &DavHandler, uri: &str, data: &str) -> Reply {
    send(dav, "PUT", uri, &[], data).await
}

async fn lock(dav: &DavHandler, uri: &str, lockinfo: &str) -> Reply {
    send(dav, "LOCK", uri, &[], lockinfo).await
}

fn gunzip(data: &[u8]) -> String {
    let mut out = String::new();
    flate2::read::GzDecoder::new(data)
        .read_to_string(&mut out)
        .unwrap();
    out
}

fn token(reply: &Reply) -> String {
    let t = reply.header("lock-token");
    t.trim_start_matches('<').trim_end_matches('>').to_string()
}

#[tokio::test]
async fn options() {
    let dav = server();
    let r = send(&dav, "OPTIONS", "/dav/anything/at/all", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("dav"), "1, 2, 3");
    assert_eq!(r.header("ms-author-via"), "DAV");
    assert!(r.header("allow").contains("PROPFIND"));
    assert!(r.header("allow").contains("LOCK"));

    let ro = DavHandler::builder(Storage::Mem)
        .methods(DavMethodSet::WEBDAV_RO)
        .build();
    let r = send(&ro, "OPTIONS", "/", &[], "").await;
    assert_eq!(r.header("allow"), "OPTIONS, GET, HEAD, PROPFIND");
    let r = send(&ro, "PUT", "/a.txt", &[], "x").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_method_and_bad_paths() {
    let dav = server();
    let r = send(&dav, "BREW", "/dav/pot", &[], "").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);

    let r = send(&dav, "GET", "/dav", &[], "").await;
    assert_eq!(r.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(r.header("location"), "/dav/");

    let r = send(&dav, "GET", "/elsewhere/a.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = send(&dav, "GET", "/dav/a/%2e%2e/b", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert!(r.text().contains("<s:message>"), "{}", r.text());
}

#[tokio::test]
async fn mkcol() {
    let dav = server();
    let r = send(&dav, "MKCOL", "/dav/dir/", &[], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "MKCOL", "/dav/dir/", &[], "").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    let r = send(&dav, "MKCOL", "/dav/missing/dir/", &[], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
    let r = send(&dav, "MKCOL", "/dav/other/", &[], "<foo/>").await;
    assert_eq!(r.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn put_and_if_match() {
    let dav = server();
    let r = put(&dav, "/dav/a.txt", "hello").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let etag = r.header("etag").to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'), "{etag}");

    let r = send(&dav, "PUT", "/dav/a.txt", &[("if-match", "\"stale\"")], "again").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(&dav, "PUT", "/dav/a.txt", &[("if-match", etag.as_str())], "again").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_ne!(r.header("etag"), etag);

    let r = send(&dav, "PUT", "/dav/a.txt", &[("if-none-match", "*")], "x").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(&dav, "PUT", "/dav/b.txt", &[("x-expected-entity-length", "5")], "hello").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    let r = send(&dav, "PUT", "/dav/b.txt", &[("content-range", "bytes 0-4/5")], "hello").await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);

    let r = send(&dav, "GET", "/dav/a.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.text(), "again");
    assert_eq!(r.header("content-type"), "text/plain");
    assert!(!r.header("last-modified").is_empty());
}

#[tokio::test]
async fn ranges() {
    let dav = server();
    put(&dav, "/dav/r.txt", "hello world").await;

    let r = send(&dav, "GET", "/dav/r.txt", &[("range", "bytes=0-0")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.header("content-range"), "bytes 0-0/11");
    assert_eq!(r.text(), "h");

    let r = send(&dav, "GET", "/dav/r.txt", &[("range", "bytes=-5")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.text(), "world");

    let r = send(&dav, "GET", "/dav/r.txt", &[("range", "bytes=11-")], "").await;
    assert_eq!(r.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(r.header("content-range"), "bytes */11");
}

#[tokio::test]
async fn head_and_gzip() {
    let dav = server();
    let data = "compress me ".repeat(100);
    put(&dav, "/dav/z.txt", &data).await;

    let r = send(&dav, "HEAD", "/dav/z.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("content-length"), data.len().to_string());
    assert!(r.body.is_empty());

    let r = send(&dav, "GET", "/dav/z.txt", &[("accept-encoding", "gzip, deflate")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("content-encoding"), "gzip");
    let mut out = String::new();
    flate2::read::GzDecoder::new(&r.body[..])
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, data);

    let r = send(&dav, "HEAD", "/dav/nope.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert!(r.body.is_empty());
}

#[tokio::test]
async fn collection_listing() {
    let dav = server();
    send(&dav, "MKCOL", "/dav/dir/", &[], "").await;
    send(&dav, "MKCOL", "/dav/dir/sub/", &[], "").await;
    put(&dav, "/dav/dir/a%20&%20b.txt", "x").await;

    let r = send(&dav, "GET", "/dav/dir/", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.text(), "a & b.txt\nsub/\n");

    let r = send(&dav, "GET", "/dav/dir/", &[("accept", "text/html")], "").await;
    assert!(r.header("content-type").starts_with("text/html"));
    assert!(r.text().contains("a &amp; b.txt"), "{}", r.text());

    let r = send(&dav, "GET", "/dav/dir/sub/", &[], "").await;
    assert_eq!(r.text(), "This collection is empty.\n");
}

#[tokio::test]
async fn propfind_depth() {
    let dav = server();
    send(&dav, "MKCOL", "/dav/dir/", &[], "").await;
    put(&dav, "/dav/dir/one.txt", "1").await;
    put(&dav, "/dav/dir/two%20words.txt", "2").await;

    let r = send(&dav, "PROPFIND", "/dav/dir/", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.text().matches("<d:response>").count(), 1);

    let r = send(&dav, "PROPFIND", "/dav/dir", &[("depth", "1")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    let text = r.text();
    assert_eq!(text.matches("<d:response>").count(), 3, "{text}");
    assert!(text.contains("<d:href>/dav/dir/</d:href>"), "{text}");
    assert!(text.contains("<d:href>/dav/dir/two%20words.txt</d:href>"), "{text}");
    assert!(text.contains("<d:collection"), "{text}");

    // an empty Depth: means 0.
    let r = send(&dav, "PROPFIND", "/dav/dir/", &[("depth", "")], "").await;
    assert_eq!(r.text().matches("<d:response>").count(), 1);

    let body = r#"<?xml version="1.0"?>
        <propfind xmlns="DAV:"><prop><getcontentlength/><x:color xmlns:x="urn:x"/></prop></propfind>"#;
    let r = send(&dav, "PROPFIND", "/dav/dir/one.txt", &[("depth", "0")], body).await;
    let text = r.text();
    assert!(text.contains("<d:getcontentlength>1</d:getcontentlength>"), "{text}");
    assert!(text.contains("HTTP/1.1 404 Not Found"), "{text}");

    let r = send(&dav, "PROPFIND", "/dav/gone", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proppatch_is_idempotent() {
    let dav = server();
    put(&dav, "/dav/p.txt", "x").await;
    let body = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
          <D:set><D:prop><Z:color>red</Z:color></D:prop></D:set>
        </D:propertyupdate>"#;

    let r1 = send(&dav, "PROPPATCH", "/dav/p.txt", &[], body).await;
    let r2 = send(&dav, "PROPPATCH", "/dav/p.txt", &[], body).await;
    assert_eq!(r1.status, StatusCode::MULTI_STATUS);
    assert_eq!(r1.status, r2.status);
    assert_eq!(r1.body, r2.body);

    let query = r#"<propfind xmlns="DAV:"><prop><color xmlns="urn:z"/></prop></propfind>"#;
    let r = send(&dav, "PROPFIND", "/dav/p.txt", &[("depth", "0")], query).await;
    let text = r.text();
    assert!(text.contains(">red</"), "{text}");
    assert!(text.contains("urn:z"), "{text}");
}

#[tokio::test]
async fn lock_and_delete() {
    let dav = server();
    put(&dav, "/dav/l.txt", "x").await;

    let r = lock(&dav, "/dav/l.txt", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = token(&r);
    assert!(token.starts_with("opaquelocktoken:"), "{token}");
    let text = r.text();
    assert!(text.contains("<D:exclusive"), "{text}");
    assert!(text.contains("mailto:tester@example.com"), "{text}");

    let r = send(&dav, "DELETE", "/dav/l.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let r = put(&dav, "/dav/l.txt", "y").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "DELETE", "/dav/l.txt", &[("if", "(<opaquelocktoken:bogus>)")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "DELETE", "/dav/l.txt", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let if_hdr = format!("(<{token}>)");
    let r = send(&dav, "DELETE", "/dav/l.txt", &[("if", if_hdr.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    // the lock is gone with the resource.
    let r = put(&dav, "/dav/l.txt", "z").await;
    assert_eq!(r.status, StatusCode::CREATED);
}

#[tokio::test]
async fn lock_scopes() {
    let dav = server();
    put(&dav, "/dav/s.txt", "x").await;

    let r = lock(&dav, "/dav/s.txt", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let exclusive = token(&r);
    let r = lock(&dav, "/dav/s.txt", LOCKINFO_SHARED).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let lt = format!("<{exclusive}>");
    let r = send(&dav, "UNLOCK", "/dav/s.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&dav, "UNLOCK", "/dav/s.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = lock(&dav, "/dav/s.txt", LOCKINFO_SHARED).await;
    assert_eq!(r.status, StatusCode::OK);
    let r = lock(&dav, "/dav/s.txt", LOCKINFO_SHARED).await;
    assert_eq!(r.status, StatusCode::OK);
    let r = lock(&dav, "/dav/s.txt", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::LOCKED);
}

#[tokio::test]
async fn lock_refresh_and_collections() {
    let dav = server();
    send(&dav, "MKCOL", "/dav/c/", &[], "").await;

    let r = lock(&dav, "/dav/c/", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = token(&r);

    // members of a locked collection are locked too.
    let r = put(&dav, "/dav/c/new.txt", "x").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let if_hdr = format!("</dav/c/> (<{token}>)");
    let r = send(&dav, "PUT", "/dav/c/new.txt", &[("if", if_hdr.as_str())], "x").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = send(&dav, "LOCK", "/dav/c/", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let if_hdr = format!("(<{token}>)");
    let r = send(&dav, "LOCK", "/dav/c/", &[("if", if_hdr.as_str())], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(self::token(&r), token);

    let r = lock(&dav, "/dav/c/", "<D:propfind xmlns:D=\"DAV:\"/>").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_overwrite() {
    let dav = server();
    put(&dav, "/dav/a.txt", "aaa").await;
    put(&dav, "/dav/b.txt", "bbb").await;

    let dest = [("destination", "/dav/b.txt"), ("overwrite", "F")];
    let r = send(&dav, "COPY", "/dav/a.txt", &dest, "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let dest = [("destination", "http://localhost/dav/b.txt"), ("overwrite", "T")];
    let r = send(&dav, "COPY", "/dav/a.txt", &dest, "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(send(&dav, "GET", "/dav/b.txt", &[], "").await.text(), "aaa");

    let r = send(&dav, "COPY", "/dav/a.txt", &[("destination", "/dav/c.txt")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = send(&dav, "COPY", "/dav/a.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&dav, "COPY", "/dav/a.txt", &[("destination", "/dav/a.txt")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn move_releases_lock() {
    let dav = server();
    send(&dav, "MKCOL", "/dav/d/", &[], "").await;
    put(&dav, "/dav/d/m.txt", "m").await;

    let r = lock(&dav, "/dav/d/m.txt", LOCKINFO_EXCLUSIVE).await;
    let token = token(&r);

    let r = send(&dav, "MOVE", "/dav/d/m.txt", &[("destination", "/dav/d/n.txt")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let if_hdr = format!("(<{token}>)");
    let hdrs = [("destination", "/dav/d/n.txt"), ("if", if_hdr.as_str())];
    let r = send(&dav, "MOVE", "/dav/d/m.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    assert_eq!(send(&dav, "GET", "/dav/d/m.txt", &[], "").await.status, StatusCode::NOT_FOUND);
    let r = send(&dav, "DELETE", "/dav/d/n.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    // moving into the root with just the base as destination.
    put(&dav, "/dav/d/up.txt", "u").await;
    let r = send(&dav, "MOVE", "/dav/d/up.txt", &[("destination", "/dav/")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/dav/up.txt", &[], "").await.text(), "u");

    let r = send(&dav, "MOVE", "/dav/d/", &[("destination", "/dav/d/inner/")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn custom_storage_and_prefix_override() {
    let dav = DavHandler::builder(Storage::Custom(MemStore::new())).build();
    let r = put(&dav, "/x.txt", "x").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let req = Request::builder()
        .method("GET")
        .uri("/mnt/x.txt")
        .header(header::ACCEPT, "*/*")
        .body(Body::empty())
        .unwrap();
    let resp = dav.handle_with(req, Some("/mnt".to_string())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.into_body().into_bytes().await.unwrap(), Bytes::from("x"));

    let mut set = DavMethodSet::none();
    set.add(DavMethod::GET);
    let ro = DavHandler::builder(Storage::Mem).methods(set).build();
    let r = send(&ro, "HEAD", "/x.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn locked_member_blocks_parent() {
    let dav = server();
    send(&dav, "MKCOL", "/dav/dir/", &[], "").await;
    put(&dav, "/dav/dir/f.txt", "f").await;
    let r = lock(&dav, "/dav/dir/f.txt", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = token(&r);

    let r = send(&dav, "DELETE", "/dav/dir/", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let r = send(&dav, "MOVE", "/dav/dir/", &[("destination", "/dav/moved/")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    // overwriting a collection with a locked member.
    send(&dav, "MKCOL", "/dav/src/", &[], "").await;
    let hdrs = [("destination", "/dav/dir/"), ("overwrite", "T")];
    let r = send(&dav, "COPY", "/dav/src/", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    // the lock survived all of the above.
    let r = put(&dav, "/dav/dir/f.txt", "g").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    // the member's token does not unlock its parent.
    let if_hdr = format!("(<{token}>)");
    let r = send(&dav, "DELETE", "/dav/dir/", &[("if", if_hdr.as_str())], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let lock_hdr = format!("<{token}>");
    let hdrs = [("lock-token", lock_hdr.as_str())];
    let r = send(&dav, "UNLOCK", "/dav/dir/f.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&dav, "DELETE", "/dav/dir/", &[], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&dav, "GET", "/dav/dir/f.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn depth_zero_lock() {
    let dav = server();
    send(&dav, "MKCOL", "/dav/c/", &[], "").await;
    put(&dav, "/dav/c/m.txt", "m").await;

    let r = send(&dav, "LOCK", "/dav/c/", &[("depth", "0")], LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.text().contains("<D:depth>0</D:depth>"), "{}", r.text());

    // only the collection itself is locked.
    let r = put(&dav, "/dav/c/m.txt", "n").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = lock(&dav, "/dav/c/m.txt", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);

    let r = lock(&dav, "/dav/", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let r = send(&dav, "LOCK", "/dav/c/", &[], LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::LOCKED);
}

#[tokio::test]
async fn put_rejects_encoded_bodies() {
    let dav = server();
    let ct = [("content-type", "multipart/byteranges; boundary=xyz")];
    let r = send(&dav, "PUT", "/dav/m.txt", &ct, "--xyz--").await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);

    let r = send(&dav, "PUT", "/dav/g.txt", &[("content-encoding", "gzip")], "x").await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);

    let r = send(&dav, "GET", "/dav/g.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

fn digits(n: usize) -> String {
    (0..n).map(|i| char::from(b'0' + (i % 10) as u8)).collect()
}

#[tokio::test]
async fn local_files_stream() {
    let dir = tempfile::tempdir().unwrap();
    let data = digits(30000);
    std::fs::File::create(dir.path().join("big.txt"))
        .unwrap()
        .write_all(data.as_bytes())
        .unwrap();
    let dav = DavHandler::builder(Storage::local(dir.path(), false))
        .strip_prefix("/dav")
        .build();

    let r = send(&dav, "GET", "/dav/big.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("content-length"), "30000");
    assert_eq!(r.body, Bytes::from(data.clone()));

    let r = send(&dav, "GET", "/dav/big.txt", &[("range", "bytes=10000-10009")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.header("content-range"), "bytes 10000-10009/30000");
    assert_eq!(r.header("content-length"), "10");
    assert_eq!(r.text(), "0123456789");

    let hdrs = [("range", "bytes=-5"), ("accept-encoding", "gzip")];
    let r = send(&dav, "GET", "/dav/big.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.header("content-encoding"), "gzip");
    assert!(r.headers.get("content-length").is_none());
    assert_eq!(gunzip(&r.body), "56789");

    let r = send(&dav, "GET", "/dav/big.txt", &[("accept-encoding", "gzip")], "").await;
    assert_eq!(gunzip(&r.body), data);
}

// Serves file content as a plain reader, everything else from memory.
struct ReaderStore(Arc<MemStore>);

impl DavStorage for ReaderStore {
    fn get<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<DavContent>> {
        Box::pin(async move {
            let content = match self.0.get(path).await? {
                Some(DavContent::Bytes(b)) => {
                    Some(DavContent::Stream(Box::new(std::io::Cursor::new(b))))
                }
                other => other,
            };
            Ok(content)
        })
    }

    fn exists<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, bool> {
        self.0.exists(path)
    }

    fn properties<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
        depth: u32,
    ) -> StoreFuture<'a, Option<PropMap>> {
        self.0.properties(path, requested, depth)
    }

    fn put<'a>(&'a self, path: &'a DavPath, body: PutStream<'a>) -> StoreFuture<'a, bool> {
        self.0.put(path, body)
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()> {
        self.0.delete(path)
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool> {
        self.0.copy(from, to)
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> StoreFuture<'a, bool> {
        self.0.rename(from, to)
    }

    fn mkcol<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ()> {
        self.0.mkcol(path)
    }

    fn list<'a>(
        &'a self,
        path: &'a DavPath,
        requested: Option<&'a [PropName]>,
    ) -> StoreFuture<'a, Vec<DavListEntry>> {
        self.0.list(path, requested)
    }
}

#[tokio::test]
async fn reader_content_streams() {
    let dav = DavHandler::builder(Storage::custom(ReaderStore(MemStore::new()))).build();
    put(&dav, "/r.txt", "hello world").await;

    let r = send(&dav, "GET", "/r.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("content-length"), "11");
    assert_eq!(r.text(), "hello world");

    // the reader is skipped up to the start of the range.
    let r = send(&dav, "GET", "/r.txt", &[("range", "bytes=6-")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.header("content-range"), "bytes 6-10/11");
    assert_eq!(r.text(), "world");

    let hdrs = [("range", "bytes=0-4"), ("accept-encoding", "gzip")];
    let r = send(&dav, "GET", "/r.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert!(r.headers.get("content-length").is_none());
    assert_eq!(gunzip(&r.body), "hello");

    // locks fall back to the permissive defaults.
    let r = lock(&dav, "/r.txt", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let r = put(&dav, "/r.txt", "still writable").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}
