//! `rudder.services.ReleaseService`.
//!
//! [`ReleaseService`] holds the handlers. [`ReleaseServer`] is the tonic
//! service wrapper: it routes on the request path, runs the call behind
//! the [`AuthGateway`], decodes the request and encodes the reply.

use super::codec::{
    decode_message, encode_grpc_message, grpc_error_response, grpc_response,
    grpc_stream_response, request_body, MessageReader, RequestBody,
};
use super::context::CallContext;
use super::interceptor::{split_method, AuthGateway};
use super::proto;
use super::stream::{GrpcServerStream, ServerStream, ServerStreamExt, StreamResponse};
use super::SERVICE_NAME;
use crate::cluster::LabelSelector;
use crate::core::error::{RudderError, RudderResult};
use crate::ops::version::VersionInfo;
use crate::storage::{Release, Storage};
use futures::StreamExt;
use prost::Message;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tonic::body::BoxBody;
use tonic::codegen::http::{Request, Response};
use tonic::metadata::MetadataMap;
use tonic::Status;

/// Default request size limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Release service handlers.
#[derive(Clone)]
pub struct ReleaseService {
    storage: Storage,
    version: Arc<VersionInfo>,
}

fn required(release: Option<proto::Release>) -> RudderResult<Release> {
    release
        .map(Release::from)
        .ok_or_else(|| RudderError::invalid_request("release is required"))
}

fn caller(context: &CallContext) -> &str {
    context
        .auth()
        .map(|auth| auth.user.username.as_str())
        .unwrap_or_default()
}

impl ReleaseService {
    pub fn new(storage: Storage, version: VersionInfo) -> Self {
        Self {
            storage,
            version: Arc::new(version),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn get_version(
        &self,
        _context: &CallContext,
        _request: proto::GetVersionRequest,
    ) -> RudderResult<proto::GetVersionResponse> {
        Ok(proto::GetVersionResponse {
            sem_ver: self.version.sem_ver.clone(),
            git_commit: self.version.git_commit.clone().unwrap_or_default(),
            git_tree_state: self.version.git_tree_state.clone().unwrap_or_default(),
        })
    }

    pub async fn who_am_i(
        &self,
        context: &CallContext,
        _request: proto::WhoAmIRequest,
    ) -> RudderResult<proto::WhoAmIResponse> {
        let auth = context
            .auth()
            .ok_or_else(|| RudderError::unauthenticated("call was not authenticated"))?;
        Ok(proto::WhoAmIResponse {
            username: auth.user.username.clone(),
            groups: auth.user.groups.clone(),
            impersonating: auth.impersonating,
        })
    }

    pub async fn get_release(
        &self,
        _context: &CallContext,
        request: proto::GetReleaseRequest,
    ) -> RudderResult<proto::GetReleaseResponse> {
        let release = self.storage.get(&request.name).await?;
        Ok(proto::GetReleaseResponse {
            release: Some(release.into()),
        })
    }

    pub async fn list_releases(
        &self,
        _context: &CallContext,
        request: proto::ListReleasesRequest,
    ) -> RudderResult<proto::ListReleasesResponse> {
        let selector = LabelSelector::from_labels(request.selector);
        let releases = self.storage.list(&selector).await?;
        Ok(proto::ListReleasesResponse {
            releases: releases.into_iter().map(proto::Release::from).collect(),
        })
    }

    pub async fn install_release(
        &self,
        context: &CallContext,
        request: proto::InstallReleaseRequest,
    ) -> RudderResult<proto::InstallReleaseResponse> {
        let created = self.storage.create(required(request.release)?).await?;
        tracing::info!(release = %created.name(), user = caller(context), "release installed");
        Ok(proto::InstallReleaseResponse {
            release: Some(created.into()),
        })
    }

    pub async fn update_release(
        &self,
        context: &CallContext,
        request: proto::UpdateReleaseRequest,
    ) -> RudderResult<proto::UpdateReleaseResponse> {
        let updated = self.storage.update(required(request.release)?).await?;
        tracing::info!(release = %updated.name(), user = caller(context), "release updated");
        Ok(proto::UpdateReleaseResponse {
            release: Some(updated.into()),
        })
    }

    pub async fn update_release_status(
        &self,
        _context: &CallContext,
        request: proto::UpdateReleaseStatusRequest,
    ) -> RudderResult<proto::UpdateReleaseStatusResponse> {
        let updated = self.storage.update_status(required(request.release)?).await?;
        Ok(proto::UpdateReleaseStatusResponse {
            release: Some(updated.into()),
        })
    }

    pub async fn uninstall_release(
        &self,
        context: &CallContext,
        request: proto::UninstallReleaseRequest,
    ) -> RudderResult<proto::UninstallReleaseResponse> {
        self.storage.delete(&request.name).await?;
        tracing::info!(release = %request.name, user = caller(context), "release uninstalled");
        Ok(proto::UninstallReleaseResponse {})
    }

    /// Stream release changes until the client goes away.
    pub async fn watch_releases<S: ServerStream + ?Sized>(
        &self,
        stream: &mut S,
    ) -> Result<(), Status> {
        let request: proto::WatchReleasesRequest = stream
            .recv_message()
            .await?
            .ok_or_else(|| Status::invalid_argument("missing watch request"))?;

        let selector = LabelSelector::from_labels(request.selector);
        let mut events = self.storage.watch(&selector).await?;
        tracing::debug!(user = caller(stream.context()), "watch started");
        stream.send_header(MetadataMap::new()).await?;

        while let Some(event) = events.next().await {
            let response = proto::WatchReleasesResponse::from(event?);
            stream.send_message(&response).await?;
        }
        Ok(())
    }
}

struct ServerInner {
    gateway: AuthGateway,
    service: ReleaseService,
    max_message_size: usize,
}

/// Tonic wrapper for [`ReleaseService`].
#[derive(Clone)]
pub struct ReleaseServer {
    inner: Arc<ServerInner>,
}

impl ReleaseServer {
    /// Requests larger than `max_message_size` bytes are rejected.
    pub fn new(gateway: AuthGateway, service: ReleaseService, max_message_size: usize) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                gateway,
                service,
                max_message_size,
            }),
        }
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.inner.gateway
    }
}

async fn read_request<Req: Message + Default>(reader: &mut MessageReader) -> Result<Req, Status> {
    match reader.next_message().await? {
        Some(raw) => decode_message::<Req>(&raw),
        None => Err(Status::invalid_argument("missing request message")),
    }
}

impl ServerInner {
    async fn unary<Req, Resp, F, Fut>(
        &self,
        context: CallContext,
        path: &str,
        mut reader: MessageReader,
        handler: F,
    ) -> Response<BoxBody>
    where
        Req: Message + Default,
        Resp: Message,
        F: FnOnce(CallContext, Req) -> Fut,
        Fut: Future<Output = RudderResult<Resp>>,
    {
        // The body is read only once the caller is authenticated.
        let result = self
            .gateway
            .intercept_unary(context, path, move |derived| async move {
                let request = read_request::<Req>(&mut reader).await?;
                handler(derived, request).await.map_err(Status::from)
            })
            .await;
        match result {
            Ok(response) => grpc_response(encode_grpc_message(&response)),
            Err(status) => {
                tracing::debug!(path, code = ?status.code(), "call failed");
                grpc_error_response(status)
            }
        }
    }

    async fn watch(
        self: Arc<Self>,
        context: CallContext,
        path: String,
        body: RequestBody,
    ) -> Response<BoxBody> {
        let deadline = context.deadline();
        let (stream, response) = GrpcServerStream::open(context, body, self.max_message_size);
        let StreamResponse {
            header,
            body,
            finisher,
        } = response;
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let service = self.service.clone();
            let handler = self.gateway.intercept_stream(stream, &path, |mut stream| async move {
                service.watch_releases(&mut stream).await
            });
            let expired = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let result = tokio::select! {
                result = handler => result,
                _ = finisher.closed() => Err(Status::cancelled("client went away")),
                _ = expired => Err(Status::deadline_exceeded("call deadline passed")),
            };
            let status = finisher.finish(result).await;
            let _ = done_tx.send(status);
        });

        match header.await {
            Ok(metadata) => grpc_stream_response(metadata.into_headers(), body),
            // The handler ended before sending anything.
            Err(_) => grpc_error_response(
                done_rx
                    .await
                    .unwrap_or_else(|_| Status::internal("stream handler exited")),
            ),
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        path: String,
        context: CallContext,
        body: RequestBody,
    ) -> Response<BoxBody> {
        let method = match split_method(&path) {
            Some((service, method)) if service == SERVICE_NAME => method.to_string(),
            _ => {
                tracing::warn!(path = %path, "unknown service");
                return grpc_error_response(Status::unimplemented(format!(
                    "unknown method: {}",
                    path
                )));
            }
        };

        if method == "WatchReleases" {
            return self.watch(context, path, body).await;
        }

        let reader = MessageReader::new(body, self.max_message_size);
        let service = &self.service;
        match method.as_str() {
            "GetVersion" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.get_version(&ctx, req).await
                })
                .await
            }
            "WhoAmI" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.who_am_i(&ctx, req).await
                })
                .await
            }
            "GetRelease" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.get_release(&ctx, req).await
                })
                .await
            }
            "ListReleases" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.list_releases(&ctx, req).await
                })
                .await
            }
            "InstallRelease" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.install_release(&ctx, req).await
                })
                .await
            }
            "UpdateRelease" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.update_release(&ctx, req).await
                })
                .await
            }
            "UpdateReleaseStatus" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.update_release_status(&ctx, req).await
                })
                .await
            }
            "UninstallRelease" => {
                self.unary(context, &path, reader, |ctx, req| async move {
                    service.uninstall_release(&ctx, req).await
                })
                .await
            }
            _ => {
                tracing::warn!(path = %path, "unknown release method");
                grpc_error_response(Status::unimplemented(format!("unknown method: {}", path)))
            }
        }
    }
}

impl tonic::server::NamedService for ReleaseServer {
    const NAME: &'static str = SERVICE_NAME;
}

impl<B> tonic::codegen::Service<Request<B>> for ReleaseServer
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<bytes::Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = Response<BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();
        let context = CallContext::from_http_parts(&parts);
        let body = request_body(body);
        tracing::trace!(path = %path, "release call");

        Box::pin(async move { Ok(inner.dispatch(path, context, body).await) })
    }
}
