//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use extension_kit::config::ListenSpecification;
use extension_kit::net::{BoundAddress, ExtensionServer, ListenError, ListenOptions};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Copy fixtures into a fresh temporary directory.
pub fn fixture_dir(names: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::copy(fixture(name), dir.path().join(name)).unwrap();
    }
    dir
}

pub fn localhost() -> ListenOptions {
    ListenOptions::new(0).with_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub fn hello_router() -> Router {
    Router::new().route("/hello", get(|| async { "hello" }))
}

/// Listen in the background and wait until the server is serving.
pub async fn start(
    server: &ExtensionServer,
    router: Router,
    spec: ListenSpecification,
) -> (BoundAddress, JoinHandle<Result<(), ListenError>>) {
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.listen_with(router, localhost(), spec).await }
    });
    let address = tokio::time::timeout(Duration::from_secs(10), server.wait_for_serve())
        .await
        .expect("server did not start in time")
        .expect("server failed to start");
    (address, task)
}

pub fn tcp(address: &BoundAddress) -> SocketAddr {
    address.tcp().expect("expected a TCP address")
}

/// HTTPS client trusting only the test CA, resolving `localhost` to `addr`.
pub fn tls_client(addr: SocketAddr, identity: Option<(&str, &str)>) -> reqwest::Client {
    let ca = reqwest::Certificate::from_pem(&std::fs::read(fixture("ca.crt")).unwrap()).unwrap();
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(ca)
        .resolve("localhost", addr)
        .timeout(Duration::from_secs(10));

    if let Some((cert, key)) = identity {
        let mut pem = std::fs::read(fixture(cert)).unwrap();
        pem.extend(std::fs::read(fixture(key)).unwrap());
        builder = builder.identity(reqwest::Identity::from_pem(&pem).unwrap());
    }
    builder.build().unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
