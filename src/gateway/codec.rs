//! gRPC message framing and response bodies.
//!
//! Every message on the wire is prefixed by one compression flag byte and
//! a big-endian u32 length. Compressed messages are rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use prost::Message;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tonic::body::BoxBody;
use tonic::codegen::http::{header, HeaderMap, HeaderValue, Response};
use tonic::Status;

const HEADER_LEN: usize = 5;

/// Request body with data and errors normalized.
pub type RequestBody = UnsyncBoxBody<Bytes, Status>;

/// Box an arbitrary request body.
pub fn request_body<B>(body: B) -> RequestBody
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    body.map_frame(|frame| frame.map_data(Into::into))
        .map_err(|e| Status::from_error(e.into()))
        .boxed_unsync()
}

/// Frame a raw message.
pub fn frame_message(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + message.len());
    buf.put_u8(0);
    buf.put_u32(message.len() as u32);
    buf.put_slice(message);
    buf.freeze()
}

/// Encode and frame a message.
pub fn encode_grpc_message<M: Message>(msg: &M) -> Bytes {
    frame_message(&msg.encode_to_vec())
}

/// Decode a framed message.
#[allow(clippy::result_large_err)]
pub fn decode_grpc_message<M: Message + Default>(body: &[u8]) -> Result<M, Status> {
    if body.len() < HEADER_LEN {
        return Err(Status::invalid_argument("gRPC message too short"));
    }
    if body[0] != 0 {
        return Err(Status::unimplemented("compressed messages are not supported"));
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if body.len() < HEADER_LEN + len {
        return Err(Status::invalid_argument(format!(
            "gRPC message truncated: expected {} bytes, got {}",
            len,
            body.len() - HEADER_LEN
        )));
    }
    decode_message(&body[HEADER_LEN..HEADER_LEN + len])
}

/// Decode an unframed message.
#[allow(clippy::result_large_err)]
pub fn decode_message<M: Message + Default>(message: &[u8]) -> Result<M, Status> {
    M::decode(message).map_err(|e| Status::invalid_argument(format!("decode error: {}", e)))
}

/// Reads successive messages off a request body.
pub struct MessageReader {
    body: RequestBody,
    buf: BytesMut,
    max_message_size: usize,
    finished: bool,
}

impl MessageReader {
    pub fn new(body: RequestBody, max_message_size: usize) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
            max_message_size,
            finished: false,
        }
    }

    /// Next unframed message, or `None` once the client half-closes.
    #[allow(clippy::result_large_err)]
    pub async fn next_message(&mut self) -> Result<Option<Bytes>, Status> {
        loop {
            if let Some(message) = self.split_message()? {
                return Ok(Some(message));
            }
            if self.finished {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Status::internal("request body ended mid-message"));
            }

            match self.body.frame().await {
                Some(Ok(frame)) => {
                    // Request trailers carry nothing we use.
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(status)) => return Err(status),
                None => self.finished = true,
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn split_message(&mut self) -> Result<Option<Bytes>, Status> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0] != 0 {
            return Err(Status::unimplemented("compressed messages are not supported"));
        }
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > self.max_message_size {
            return Err(Status::resource_exhausted(format!(
                "message of {} bytes exceeds limit of {} bytes",
                len, self.max_message_size
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

/// Trailers for a finished call.
pub fn status_trailers(status: &Status) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    if status.add_header(&mut trailers).is_err() {
        trailers.insert(
            "grpc-status",
            HeaderValue::from(status.code() as i32),
        );
    }
    trailers
}

/// Unary response body: one data frame, then `grpc-status: 0`.
struct GrpcBody {
    data: Option<Bytes>,
    trailers_sent: bool,
}

impl http_body::Body for GrpcBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if !self.trailers_sent {
            self.trailers_sent = true;
            return Poll::Ready(Some(Ok(Frame::trailers(status_trailers(&Status::ok(""))))));
        }
        Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers_sent
    }
}

/// Frames produced by a streaming handler.
pub type FrameSender = mpsc::Sender<Result<Frame<Bytes>, Status>>;

/// Streaming response body fed by a [`FrameSender`].
pub struct FrameBody {
    rx: mpsc::Receiver<Result<Frame<Bytes>, Status>>,
}

impl FrameBody {
    pub fn channel(capacity: usize) -> (FrameSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

impl http_body::Body for FrameBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.rx.poll_recv(cx)
    }
}

fn grpc_http_response(body: BoxBody) -> Response<BoxBody> {
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    response
}

/// Successful unary response carrying one framed message.
pub fn grpc_response(body: Bytes) -> Response<BoxBody> {
    grpc_http_response(BoxBody::new(GrpcBody {
        data: Some(body),
        trailers_sent: false,
    }))
}

/// Streaming response; `headers` are sent before the first message.
pub fn grpc_stream_response(headers: HeaderMap, body: FrameBody) -> Response<BoxBody> {
    let mut response = grpc_http_response(BoxBody::new(body));
    response.headers_mut().extend(headers);
    response
}

/// Trailers-only error response.
pub fn grpc_error_response(status: Status) -> Response<BoxBody> {
    status.into_http()
}
