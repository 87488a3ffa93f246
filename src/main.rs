use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dav_server::DavHandler;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use mediadav::config::{Cli, Config};
use mediadav::dav_fs::{mime_type_for, MediaDavFileSystem};
use mediadav::metadata::MetadataResolver;
use mediadav::upstream::UpstreamClient;
use mediadav::vfs::VirtualFileSystem;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = Config::load(&cli);
    if !config.credentials_present() {
        error!("RD_USERNAME and RD_PASSWORD must both be set");
        std::process::exit(1);
    }

    let upstream = Arc::new(UpstreamClient::new(&config));
    let metadata = Arc::new(MetadataResolver::new(&config));
    let vfs = Arc::new(VirtualFileSystem::new(
        upstream.clone(),
        metadata.clone(),
        Duration::from_secs(config.cache_ttl_secs),
    ));

    info!("building initial virtual tree...");
    vfs.rebuild().await;
    info!("initial virtual tree ready");

    let ticker_vfs = vfs.clone();
    let ticker_interval = Duration::from_secs(config.cache_ttl_secs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(ticker_interval).await;
            ticker_vfs.ensure_fresh().await;
        }
    });

    let dav_fs = MediaDavFileSystem::new(vfs.clone(), upstream.clone());
    let dav_handler = DavHandler::builder()
        .filesystem(Box::new(dav_fs))
        .locksystem(dav_server::fakels::FakeLs::new())
        .build_handler();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("WebDAV gateway listening on http://{}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!("new WebDAV connection from {}", peer);
                let io = TokioIo::new(stream);
                let dav_handler = dav_handler.clone();

                tokio::task::spawn(async move {
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service_fn(move |req: Request<hyper::body::Incoming>| {
                            let dav_handler = dav_handler.clone();
                            async move {
                                let method = req.method().clone();
                                let name = req.uri().path().rsplit('/').next().unwrap_or("").to_string();
                                let mut response = dav_handler.handle(req).await;

                                // dav-server guesses content-type from the path itself; our MIME
                                // table is more specific (iso/subtitle handling), so override it.
                                if matches!(method, Method::GET | Method::HEAD) && name.contains('.') {
                                    response
                                        .headers_mut()
                                        .insert(CONTENT_TYPE, HeaderValue::from_static(mime_type_for(&name)));
                                }

                                Ok::<_, hyper::Error>(response)
                            }
                        }))
                        .await
                    {
                        if let Some(io_err) = err.source().and_then(|s| s.downcast_ref::<std::io::Error>()) {
                            if io_err.kind() == std::io::ErrorKind::ConnectionReset
                                || io_err.kind() == std::io::ErrorKind::BrokenPipe
                            {
                                return;
                            }
                        }
                        error!("error serving connection: {:?}", err);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
