//! Server-side streams.
//!
//! [`ServerStream`] is what streaming handlers talk to. [`GrpcServerStream`]
//! is the HTTP/2 implementation; [`ContextStream`] wraps any stream and
//! substitutes the context it reports.

use super::codec::{
    frame_message, status_trailers, FrameBody, FrameSender, MessageReader, RequestBody,
};
use super::context::CallContext;
use async_trait::async_trait;
use bytes::Bytes;
use http_body::Frame;
use parking_lot::Mutex;
use prost::Message;
use std::sync::Arc;
use tokio::sync::oneshot;
use tonic::metadata::MetadataMap;
use tonic::Status;

/// Frames buffered between a handler and the connection.
const FRAME_BUFFER: usize = 16;

/// A bidirectional server stream.
///
/// Messages are raw protobuf bytes; framing is the stream's concern.
#[async_trait]
pub trait ServerStream: Send {
    /// Context of the call this stream belongs to.
    fn context(&self) -> &CallContext;

    /// Merge `metadata` into the response headers. Fails once headers are sent.
    #[allow(clippy::result_large_err)]
    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Send response headers now, merged with any set earlier.
    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Merge `metadata` into the trailers sent when the call ends.
    fn set_trailer(&mut self, metadata: MetadataMap);

    async fn send_msg(&mut self, message: Bytes) -> Result<(), Status>;

    /// Next request message, or `None` once the client half-closes.
    async fn recv_msg(&mut self) -> Result<Option<Bytes>, Status>;
}

/// Typed helpers over [`ServerStream`].
#[async_trait]
pub trait ServerStreamExt: ServerStream {
    async fn send_message<M: Message + Sync>(&mut self, message: &M) -> Result<(), Status> {
        self.send_msg(Bytes::from(message.encode_to_vec())).await
    }

    async fn recv_message<M: Message + Default>(&mut self) -> Result<Option<M>, Status> {
        match self.recv_msg().await? {
            Some(raw) => super::codec::decode_message(&raw).map(Some),
            None => Ok(None),
        }
    }
}

impl<S: ServerStream + ?Sized> ServerStreamExt for S {}

/// Reports a substituted context; everything else passes through untouched.
pub struct ContextStream<S> {
    inner: S,
    context: CallContext,
}

impl<S: ServerStream> ContextStream<S> {
    pub fn new(inner: S, context: CallContext) -> Self {
        Self { inner, context }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: ServerStream> ServerStream for ContextStream<S> {
    fn context(&self) -> &CallContext {
        &self.context
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.set_header(metadata)
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.send_header(metadata).await
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        self.inner.set_trailer(metadata)
    }

    async fn send_msg(&mut self, message: Bytes) -> Result<(), Status> {
        self.inner.send_msg(message).await
    }

    async fn recv_msg(&mut self) -> Result<Option<Bytes>, Status> {
        self.inner.recv_msg().await
    }
}

/// HTTP/2 server stream.
pub struct GrpcServerStream {
    context: CallContext,
    reader: MessageReader,
    frames: FrameSender,
    header: Option<oneshot::Sender<MetadataMap>>,
    pending_header: MetadataMap,
    trailers: Arc<Mutex<MetadataMap>>,
}

/// The connection's half of a [`GrpcServerStream`].
pub struct StreamResponse {
    /// Resolves when the handler sends headers; errors if it never does.
    pub header: oneshot::Receiver<MetadataMap>,
    /// Response body.
    pub body: FrameBody,
    /// Ends the call once the handler returns.
    pub finisher: StreamFinisher,
}

impl GrpcServerStream {
    /// Open a stream over a request body.
    pub fn open(
        context: CallContext,
        body: RequestBody,
        max_message_size: usize,
    ) -> (Self, StreamResponse) {
        let (frames, body_rx) = FrameBody::channel(FRAME_BUFFER);
        let (header_tx, header_rx) = oneshot::channel();
        let trailers = Arc::new(Mutex::new(MetadataMap::new()));

        let stream = Self {
            context,
            reader: MessageReader::new(body, max_message_size),
            frames: frames.clone(),
            header: Some(header_tx),
            pending_header: MetadataMap::new(),
            trailers: trailers.clone(),
        };
        let response = StreamResponse {
            header: header_rx,
            body: body_rx,
            finisher: StreamFinisher { frames, trailers },
        };
        (stream, response)
    }
}

/// Sends the closing trailers of a stream.
pub struct StreamFinisher {
    frames: FrameSender,
    trailers: Arc<Mutex<MetadataMap>>,
}

impl StreamFinisher {
    /// Resolves once the client stops reading the response.
    pub async fn closed(&self) {
        self.frames.closed().await
    }

    /// Send trailers for `result`. Returns the final status.
    pub async fn finish(self, result: Result<(), Status>) -> Status {
        let status = match result {
            Ok(()) => Status::ok(""),
            Err(status) => status,
        };
        let mut trailers = std::mem::take(&mut *self.trailers.lock()).into_headers();
        trailers.extend(status.metadata().clone().into_headers());
        trailers.extend(status_trailers(&status));

        // The client may already be gone.
        let _ = self.frames.send(Ok(Frame::trailers(trailers))).await;
        status
    }
}

fn merge(into: &mut MetadataMap, from: MetadataMap) {
    let mut headers = std::mem::take(into).into_headers();
    headers.extend(from.into_headers());
    *into = MetadataMap::from_headers(headers);
}

#[async_trait]
impl ServerStream for GrpcServerStream {
    fn context(&self) -> &CallContext {
        &self.context
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        if self.header.is_none() {
            return Err(Status::internal("headers already sent"));
        }
        merge(&mut self.pending_header, metadata);
        Ok(())
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        let sender = self
            .header
            .take()
            .ok_or_else(|| Status::internal("headers already sent"))?;
        let mut header = std::mem::take(&mut self.pending_header);
        merge(&mut header, metadata);
        sender
            .send(header)
            .map_err(|_| Status::cancelled("call closed before headers were sent"))
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        merge(&mut self.trailers.lock(), metadata);
    }

    async fn send_msg(&mut self, message: Bytes) -> Result<(), Status> {
        if self.header.is_some() {
            self.send_header(MetadataMap::new()).await?;
        }
        self.frames
            .send(Ok(Frame::data(frame_message(&message))))
            .await
            .map_err(|_| Status::cancelled("client went away"))
    }

    async fn recv_msg(&mut self) -> Result<Option<Bytes>, Status> {
        self.reader.next_message().await
    }
}
