//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use base64::prelude::*;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use prost::Message;
use rudder::auth::Authenticator;
use rudder::cluster::{LocalCluster, UserInfo};
use rudder::gateway::codec::{decode_grpc_message, encode_grpc_message};
use rudder::gateway::{AuthGateway, ReleaseServer, ReleaseService, API_CLIENT_HEADER};
use rudder::ops::version::VersionInfo;
use rudder::storage::{Storage, StorageFactory, StoreOptions};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tonic::body::BoxBody;
use tonic::codegen::http::{HeaderMap, Request, Response};
use tonic::codegen::Service;
use tonic::Status;

/// Version the test gateway reports and checks clients against.
pub const SERVER_VERSION: &str = "v2.1.0";

/// Bearer token the test cluster maps to `alice`.
pub const ALICE_TOKEN: &str = "t0k3n";

/// Basic credentials the test cluster accepts.
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "s3cret";

/// Self-signed certificate with CN=alice, O=rudder.
const ALICE_CERT: &str = "MIIBmTCCAT+gAwIBAgIUH/qkyMPlG95FQM0CaUom+Q9yXEIwCgYIKoZIzj0EAwIwITEPMA0GA1UECgwGcnVkZGVyMQ4wDAYDVQQDDAVhbGljZTAgFw0yNjEwMTYwMjU0MTBaGA8yMTI2MDkyMjAyNTQxMFowITEPMA0GA1UECgwGcnVkZGVyMQ4wDAYDVQQDDAVhbGljZTBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABHcsa+gabY3hryHW7hxf9PvMfoFD6cozHEhgs0yJQOrLXzhwZMWGca/hRqp3XXIqVtAO8zc52+lbMchl0Ei9+/+jUzBRMB0GA1UdDgQWBBQjhAnCvfAAKswAmEXTuohllD8uBjAfBgNVHSMEGDAWgBQjhAnCvfAAKswAmEXTuohllD8uBjAPBgNVHRMBAf8EBTADAQH/MAoGCCqGSM49BAMCA0gAMEUCIAgNLVt5QDlxG6oBwiSA4XvY1nAPe8WM0pQIvQWh6vGBAiEAvww+nfRhRlrDQ7ZFYh+4Cme361nFRsW5In06GsCoovA=";

/// Self-signed certificate with only O=rudder in the subject.
const NO_CN_CERT: &str = "MIIBeDCCAR+gAwIBAgIUK8vkkrXYtOjWBkPgo8+Nka2E9p0wCgYIKoZIzj0EAwIwETEPMA0GA1UECgwGcnVkZGVyMCAXDTI2MTAxNjAyNTQxMFoYDzIxMjYwOTIyMDI1NDEwWjARMQ8wDQYDVQQKDAZydWRkZXIwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAATqxPhoZfFKJAF3rEJH9mbB4yd6FzoLcoNj5gmMrl1mK9RgEexsZyNpxwO8SxbV0OMhx7wKQpPmQAOJrF6L8wzao1MwUTAdBgNVHQ4EFgQUtS8oApmBXbqpaD+Augc7nbD/v6wwHwYDVR0jBBgwFoAUtS8oApmBXbqpaD+Augc7nbD/v6wwDwYDVR0TAQH/BAUwAwEB/zAKBggqhkjOPQQDAgNHADBEAiABIhRajmbGUEJe1vBH3YwD50seY/Z9PHjg+Rt9FEn3OQIgPKCamBZ7+uV/MVwDyP6V5ChWbmbBpvmENdzl6IUw/NM=";

/// DER bytes of a certificate whose common name is `alice`.
pub fn alice_cert_der() -> Vec<u8> {
    BASE64_STANDARD.decode(ALICE_CERT).expect("valid base64")
}

/// DER bytes of a certificate without a common name.
pub fn no_cn_cert_der() -> Vec<u8> {
    BASE64_STANDARD.decode(NO_CN_CERT).expect("valid base64")
}

/// PEM encoding of `der`.
pub fn to_pem(der: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(line).expect("base64 is ascii"));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Cluster knowing `alice` by token and `admin` by password.
pub fn test_cluster() -> Arc<LocalCluster> {
    Arc::new(
        LocalCluster::new()
            .with_token(
                ALICE_TOKEN,
                UserInfo::new("alice").with_group("admins").with_group("devs"),
            )
            .with_basic_user(ADMIN_USER, ADMIN_PASSWORD),
    )
}

/// Authenticating gateway over `cluster`.
pub fn test_gateway(cluster: &Arc<LocalCluster>) -> AuthGateway {
    let authenticator = Authenticator::new(cluster.clone(), cluster.clone());
    AuthGateway::new(Arc::new(authenticator)).with_version(VersionInfo::new(SERVER_VERSION))
}

/// Open storage of `options` in `namespace`.
pub async fn open_storage(
    cluster: &Arc<LocalCluster>,
    namespace: &str,
    options: &StoreOptions,
) -> Storage {
    StorageFactory::new(cluster.clone(), namespace)
        .open(options)
        .await
        .expect("storage opens")
}

/// Fully wired release server over in-memory storage.
pub async fn test_server() -> (ReleaseServer, Arc<LocalCluster>) {
    test_server_with(&StoreOptions::Memory).await
}

/// Fully wired release server over storage of `options`.
pub async fn test_server_with(options: &StoreOptions) -> (ReleaseServer, Arc<LocalCluster>) {
    let cluster = test_cluster();
    let storage = open_storage(&cluster, "default", options).await;
    let gateway = test_gateway(&cluster);
    let service = ReleaseService::new(storage, VersionInfo::new(SERVER_VERSION));
    (ReleaseServer::new(gateway, service, 1024 * 1024), cluster)
}

/// Headers of a compatible client authenticating as `alice`.
pub fn alice_headers() -> Vec<(&'static str, String)> {
    vec![
        (API_CLIENT_HEADER, SERVER_VERSION.to_string()),
        ("authorization", format!("Bearer {}", ALICE_TOKEN)),
    ]
}

/// Build a gRPC request to `method` of the release service.
pub fn grpc_request<M: Message>(
    method: &str,
    message: &M,
    headers: &[(&str, String)],
) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("http://localhost/rudder.services.ReleaseService/{}", method))
        .header("content-type", "application/grpc")
        .header("te", "trailers");
    for (key, value) in headers {
        builder = builder.header(*key, value.as_str());
    }
    builder
        .body(Full::new(encode_grpc_message(message)))
        .expect("valid request")
}

/// Issue one request against `server` and return the raw response.
pub async fn call(server: &ReleaseServer, request: Request<Full<Bytes>>) -> Response<BoxBody> {
    let mut service = server.clone();
    match service.call(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Status carried in `headers`, if any.
pub fn status_in(headers: &HeaderMap) -> Option<Status> {
    Status::from_header_map(headers)
}

/// Issue a unary call and decode its reply.
pub async fn unary<Req: Message, Resp: Message + Default>(
    server: &ReleaseServer,
    method: &str,
    request: &Req,
    headers: &[(&str, String)],
) -> Result<Resp, Status> {
    let response = call(server, grpc_request(method, request, headers)).await;
    if let Some(status) = status_in(response.headers()) {
        return Err(status);
    }

    let collected = response.into_body().collect().await?;
    if let Some(status) = collected.trailers().and_then(status_in) {
        if status.code() != tonic::Code::Ok {
            return Err(status);
        }
    }
    decode_grpc_message(&collected.to_bytes())
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    write_config(
        r#"
[server]
insecure = true
"#,
    )
}

/// Write `content` to a temporary config file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}
