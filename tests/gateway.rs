//! Release gateway tests.
//!
//! These drive [`ReleaseServer`] through its tower `Service` with framed
//! HTTP requests, the same way the transport does.

mod common;

use bytes::Bytes;
use common::*;
use http_body_util::BodyExt;
use rudder::core::error::RudderError;
use rudder::gateway::codec::decode_grpc_message;
use rudder::gateway::proto;
use rudder::gateway::API_CLIENT_HEADER;
use rudder::storage::StoreOptions;
use std::collections::BTreeMap;
use std::time::Duration;
use tonic::Code;

fn release(name: &str, team: &str) -> proto::Release {
    let mut labels = BTreeMap::new();
    labels.insert("team".to_string(), team.to_string());
    proto::Release {
        name: name.to_string(),
        labels,
        payload: b"chart".to_vec(),
        status: Some(proto::ReleaseStatus {
            code: proto::StatusCode::PendingInstall as i32,
            description: "installing".to_string(),
        }),
        ..Default::default()
    }
}

async fn install(server: &rudder::gateway::ReleaseServer, name: &str, team: &str) -> proto::Release {
    let response: proto::InstallReleaseResponse = unary(
        server,
        "InstallRelease",
        &proto::InstallReleaseRequest {
            release: Some(release(name, team)),
        },
        &alice_headers(),
    )
    .await
    .unwrap();
    response.release.unwrap()
}

// ============================================================================
// Version and authentication
// ============================================================================

#[tokio::test]
async fn get_version_skips_version_check_but_not_auth() {
    let (server, _cluster) = test_server().await;

    let headers = vec![
        (API_CLIENT_HEADER, "v0.9.0".to_string()),
        ("authorization", format!("Bearer {}", ALICE_TOKEN)),
    ];
    let response: proto::GetVersionResponse =
        unary(&server, "GetVersion", &proto::GetVersionRequest {}, &headers)
            .await
            .unwrap();
    assert_eq!(response.sem_ver, SERVER_VERSION);

    let headers = vec![(API_CLIENT_HEADER, "v0.9.0".to_string())];
    let status = unary::<_, proto::GetVersionResponse>(
        &server,
        "GetVersion",
        &proto::GetVersionRequest {},
        &headers,
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn incompatible_client_is_rejected_before_auth() {
    let (server, _cluster) = test_server().await;

    let headers = vec![
        (API_CLIENT_HEADER, "v3.0.0".to_string()),
        ("authorization", "Bearer wrong".to_string()),
    ];
    let status = unary::<_, proto::ListReleasesResponse>(
        &server,
        "ListReleases",
        &proto::ListReleasesRequest::default(),
        &headers,
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(RudderError::code_of(&status), Some("VersionMismatch"));

    let snapshot = server.gateway().metrics().snapshot();
    assert_eq!(snapshot.version_mismatch, 1);
    assert_eq!(snapshot.unauthenticated, 0);
}

#[tokio::test]
async fn missing_version_header_is_incompatible() {
    let (server, _cluster) = test_server().await;

    let headers = vec![("authorization", format!("Bearer {}", ALICE_TOKEN))];
    let status = unary::<_, proto::ListReleasesResponse>(
        &server,
        "ListReleases",
        &proto::ListReleasesRequest::default(),
        &headers,
    )
    .await
    .unwrap_err();
    assert_eq!(RudderError::code_of(&status), Some("VersionMismatch"));
}

#[tokio::test]
async fn who_am_i_reports_each_scheme() {
    let (server, _cluster) = test_server().await;

    let response: proto::WhoAmIResponse =
        unary(&server, "WhoAmI", &proto::WhoAmIRequest {}, &alice_headers())
            .await
            .unwrap();
    assert_eq!(response.username, "alice");
    assert_eq!(response.groups, vec!["admins", "devs"]);
    assert!(!response.impersonating);

    let basic = base64::Engine::encode(
        &base64::prelude::BASE64_STANDARD,
        format!("{}:{}", ADMIN_USER, ADMIN_PASSWORD),
    );
    let headers = vec![
        (API_CLIENT_HEADER, SERVER_VERSION.to_string()),
        ("authorization", format!("Basic {}", basic)),
    ];
    let response: proto::WhoAmIResponse =
        unary(&server, "WhoAmI", &proto::WhoAmIRequest {}, &headers)
            .await
            .unwrap();
    assert_eq!(response.username, ADMIN_USER);
}

#[tokio::test]
async fn bad_credentials_are_unauthenticated() {
    let (server, _cluster) = test_server().await;

    for authorization in [
        "Bearer nope",
        "Basic !!!not-base64",
        "Digest abc",
        // No TLS peer, so the certificate path has nothing to verify.
        "",
    ] {
        let mut headers = vec![(API_CLIENT_HEADER, SERVER_VERSION.to_string())];
        if !authorization.is_empty() {
            headers.push(("authorization", authorization.to_string()));
        }
        let status =
            unary::<_, proto::WhoAmIResponse>(&server, "WhoAmI", &proto::WhoAmIRequest {}, &headers)
                .await
                .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated, "{}", authorization);
    }
    assert_eq!(server.gateway().metrics().snapshot().unauthenticated, 4);
}

fn undecodable_request(method: &str, headers: &[(&str, String)]) -> http::Request<http_body_util::Full<Bytes>> {
    // One frame whose payload uses the invalid wire type 7.
    let frame = Bytes::from_static(&[0, 0, 0, 0, 2, 0xff, 0xff]);
    let mut builder = http::Request::builder()
        .method("POST")
        .uri(format!("http://localhost/rudder.services.ReleaseService/{}", method))
        .header("content-type", "application/grpc");
    for (key, value) in headers {
        builder = builder.header(*key, value.as_str());
    }
    builder.body(http_body_util::Full::new(frame)).unwrap()
}

#[tokio::test]
async fn request_body_is_decoded_only_after_authentication() {
    let (server, _cluster) = test_server().await;

    let stranger = vec![
        (API_CLIENT_HEADER, SERVER_VERSION.to_string()),
        ("authorization", "Bearer nope".to_string()),
    ];
    let response = call(&server, undecodable_request("InstallRelease", &stranger)).await;
    let status = status_in(response.headers()).unwrap();
    assert_eq!(status.code(), Code::Unauthenticated);

    let response = call(&server, undecodable_request("InstallRelease", &alice_headers())).await;
    let status = status_in(response.headers()).unwrap();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn unreachable_cluster_rejects_basic_credentials() {
    let (server, cluster) = test_server().await;
    cluster.set_reachable(false);

    let basic = base64::Engine::encode(
        &base64::prelude::BASE64_STANDARD,
        format!("{}:{}", ADMIN_USER, ADMIN_PASSWORD),
    );
    let headers = vec![
        (API_CLIENT_HEADER, SERVER_VERSION.to_string()),
        ("authorization", format!("Basic {}", basic)),
    ];
    let status =
        unary::<_, proto::WhoAmIResponse>(&server, "WhoAmI", &proto::WhoAmIRequest {}, &headers)
            .await
            .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn unknown_method_is_unimplemented() {
    let (server, _cluster) = test_server().await;
    let status = unary::<_, proto::GetVersionResponse>(
        &server,
        "Rollback",
        &proto::GetVersionRequest {},
        &alice_headers(),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
}

// ============================================================================
// Release lifecycle
// ============================================================================

#[tokio::test]
async fn release_lifecycle_over_grpc() {
    let (server, _cluster) = test_server().await;

    let created = install(&server, "web", "frontend").await;
    assert_eq!(created.namespace, "default");
    assert!(!created.resource_version.is_empty());
    install(&server, "db", "backend").await;

    let status = unary::<_, proto::InstallReleaseResponse>(
        &server,
        "InstallRelease",
        &proto::InstallReleaseRequest {
            release: Some(release("web", "frontend")),
        },
        &alice_headers(),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let mut selector = BTreeMap::new();
    selector.insert("team".to_string(), "frontend".to_string());
    let listed: proto::ListReleasesResponse = unary(
        &server,
        "ListReleases",
        &proto::ListReleasesRequest { selector },
        &alice_headers(),
    )
    .await
    .unwrap();
    assert_eq!(listed.releases.len(), 1);
    assert_eq!(listed.releases[0].name, "web");

    let mut deployed = created.clone();
    deployed.status = Some(proto::ReleaseStatus {
        code: proto::StatusCode::Deployed as i32,
        description: "done".to_string(),
    });
    let updated: proto::UpdateReleaseStatusResponse = unary(
        &server,
        "UpdateReleaseStatus",
        &proto::UpdateReleaseStatusRequest {
            release: Some(deployed),
        },
        &alice_headers(),
    )
    .await
    .unwrap();
    let updated = updated.release.unwrap();
    assert_eq!(updated.status.unwrap().code, proto::StatusCode::Deployed as i32);

    // The first resource version is stale now.
    let mut stale = created.clone();
    stale.payload = b"chart-v2".to_vec();
    let status = unary::<_, proto::UpdateReleaseResponse>(
        &server,
        "UpdateRelease",
        &proto::UpdateReleaseRequest {
            release: Some(stale),
        },
        &alice_headers(),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);

    let _: proto::UninstallReleaseResponse = unary(
        &server,
        "UninstallRelease",
        &proto::UninstallReleaseRequest {
            name: "web".to_string(),
        },
        &alice_headers(),
    )
    .await
    .unwrap();
    let status = unary::<_, proto::GetReleaseResponse>(
        &server,
        "GetRelease",
        &proto::GetReleaseRequest {
            name: "web".to_string(),
        },
        &alice_headers(),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn install_without_release_is_invalid() {
    let (server, _cluster) = test_server().await;
    let status = unary::<_, proto::InstallReleaseResponse>(
        &server,
        "InstallRelease",
        &proto::InstallReleaseRequest { release: None },
        &alice_headers(),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn releases_persist_in_config_objects() {
    let (server, _cluster) = test_server_with(&StoreOptions::ConfigObject).await;
    install(&server, "api", "backend").await;

    let fetched: proto::GetReleaseResponse = unary(
        &server,
        "GetRelease",
        &proto::GetReleaseRequest {
            name: "api".to_string(),
        },
        &alice_headers(),
    )
    .await
    .unwrap();
    let fetched = fetched.release.unwrap();
    assert_eq!(fetched.payload, b"chart".to_vec());
    assert_eq!(fetched.labels.get("team").map(String::as_str), Some("backend"));
}

// ============================================================================
// Watch
// ============================================================================

#[tokio::test]
async fn watch_streams_matching_events() {
    let (server, _cluster) = test_server().await;

    let mut selector = BTreeMap::new();
    selector.insert("team".to_string(), "frontend".to_string());
    let response = call(
        &server,
        grpc_request(
            "WatchReleases",
            &proto::WatchReleasesRequest { selector },
            &alice_headers(),
        ),
    )
    .await;
    assert!(status_in(response.headers()).is_none());
    let mut body = response.into_body();

    install(&server, "db", "backend").await;
    install(&server, "web", "frontend").await;

    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("event arrives")
        .expect("stream open")
        .unwrap();
    let data: Bytes = frame.into_data().expect("data frame");
    let event: proto::WatchReleasesResponse = decode_grpc_message(&data).unwrap();
    assert_eq!(event.kind, proto::EventType::Added as i32);
    assert_eq!(event.release.unwrap().name, "web");
}

#[tokio::test]
async fn watch_rejects_unauthenticated_callers_without_streaming() {
    let (server, _cluster) = test_server().await;

    let headers = vec![
        (API_CLIENT_HEADER, SERVER_VERSION.to_string()),
        ("authorization", "Bearer nope".to_string()),
    ];
    let response = call(
        &server,
        grpc_request("WatchReleases", &proto::WatchReleasesRequest::default(), &headers),
    )
    .await;
    let status = status_in(response.headers()).expect("trailers-only response");
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn watch_ends_at_deadline() {
    let (server, _cluster) = test_server().await;

    let mut headers = alice_headers();
    headers.push(("grpc-timeout", "200m".to_string()));
    let response = call(
        &server,
        grpc_request("WatchReleases", &proto::WatchReleasesRequest::default(), &headers),
    )
    .await;
    assert!(status_in(response.headers()).is_none());

    let collected = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream ends")
        .unwrap();
    let status = collected.trailers().and_then(status_in).expect("status trailer");
    assert_eq!(status.code(), Code::DeadlineExceeded);
}
