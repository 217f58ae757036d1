//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/dav/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;

use clap::Parser;
use futures_util::future::TryFutureExt;
use headers::{authorization::Basic, Authorization, HeaderMapExt};

use minidav::{body::Body, DavHandler, Storage};

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve, the in-memory store is used without it
    #[arg(short, long)]
    dir: Option<String>,
    /// base URI the collection is served under
    #[arg(short, long, default_value = "/dav")]
    base: String,
    /// lock timeout in seconds
    #[arg(short, long, default_value = "300")]
    lock_timeout: u64,
    /// no HTML index for browsers
    #[arg(long)]
    no_autoindex: bool,
    /// require basic authentication (any user name is accepted)
    #[arg(short, long)]
    auth: bool,
}

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
}

impl Server {
    async fn handle(
        &self,
        req: hyper::Request<hyper::Body>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        // credentials are checked here, the handler never sees them.
        if self.auth && req.headers().typed_get::<Authorization<Basic>>().is_none() {
            let mut response = hyper::Response::new(Body::from("please auth"));
            *response.status_mut() = hyper::StatusCode::UNAUTHORIZED;
            response.headers_mut().insert(
                "www-authenticate",
                hyper::header::HeaderValue::from_static("Basic realm=\"minidav\""),
            );
            return Ok(response);
        }
        Ok(self.dh.handle(req).await)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let (storage, name) = match cli.dir.as_ref() {
        Some(dir) => (Storage::local(dir, true), dir.as_str()),
        None => (Storage::Mem, "memory store"),
    };

    let dav_server = Server {
        dh: DavHandler::builder(storage)
            .strip_prefix(cli.base.as_str())
            .lock_timeout(cli.lock_timeout)
            .autoindex(!cli.no_autoindex)
            .build(),
        auth: cli.auth,
    };

    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req: hyper::Request<hyper::Body>| {
                let dav_server = dav_server.clone();
                async move { dav_server.handle(req).await }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving {} on {}{}", name, addr, cli.base);
    let _ = server.await;
    Ok(())
}
