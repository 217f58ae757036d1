//! ## Minimal async WebDAV protocol core
//!
//! [`Webdav`] (RFC4918) is HTTP (GET/HEAD/PUT/DELETE) plus a handful of
//! extension methods (PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK)
//! to manage collections, read and write properties, and lock resources.
//!
//! This crate is a `handler`: it takes a `http::Request`, turns it into calls
//! against a storage backend, and produces a `http::Response` with the
//! right status code, headers and multistatus XML. It never touches resource
//! bytes itself; that is the job of a [`DavStorage`] implementation.
//!
//! The handler works with the standard http types from the `http` and
//! `http_body` crates, so it plugs straight into hyper. A compatibility
//! module for [warp][warp-compat] is also provided.
//!
//! ## What is implemented.
//!
//! - PROPFIND with Depth 0 and 1, allprop and named properties in any
//!   namespace, and a `multistatus` reply.
//! - PROPPATCH, handed to the storage as-is.
//! - LOCK / UNLOCK with exclusive and shared scopes, lock refresh through
//!   the `If:` header, and `Lock-Token:` / `If:` evaluation on every
//!   write.
//! - GET / HEAD with single byte ranges (RFC7233) and gzip.
//! - PUT, DELETE, MKCOL, COPY, MOVE, OPTIONS.
//!
//! ## Backends.
//!
//! Included are two storages:
//!
//! - [`LocalStore`]: serves a directory on the local filesystem.
//! - [`MemStore`]: ephemeral in-memory storage. Supports dead properties.
//!
//! Both keep their locks in a [`MemLs`](store::memls::MemLs) with a timeout.
//!
//! ## Example.
//!
//! Example server using [hyper] that serves the /tmp directory in r/w mode.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use minidav::{DavHandler, Storage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dir = "/tmp";
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(Storage::local(dir, false))
//!         .strip_prefix("/dav")
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving {} on {}", dir, addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/
//! [warp-compat]: crate::warp

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod store;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

#[cfg(test)]
mod tests;

pub(crate) use crate::errors::DavResult;

pub use crate::davhandler::{DavBuilder, DavHandler, Storage};
pub use crate::davpath::DavPath;
pub use crate::store::{DavStorage, PropMap, PropName, PropValue, StoreError};
#[cfg(any(docsrs, feature = "localstore"))]
pub use crate::store::LocalStore;
#[cfg(any(docsrs, feature = "memstore"))]
pub use crate::store::MemStore;
pub use crate::util::{DavMethod, DavMethodSet};
