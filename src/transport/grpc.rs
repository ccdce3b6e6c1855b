//! gRPC server for the gridgate.v1 cache protocol.
//!
//! The service is implemented directly against tonic's Service trait
//! with manual gRPC framing, matching the manual prost encoding in
//! [`crate::proxy::proto`]: request routing is a match on the URI
//! path, unary and server-streaming responses are framed by small
//! http_body::Body types, and the bidirectional events stream pumps
//! frames between the request body and a response channel.

use crate::core::error::{to_status, GateResult};
use crate::proxy::proto::{
    AggregateRequest, CacheRequest, EntriesRequest, EntryRequest, IndexRequest, InvokeRequest,
    KeyRequest, KeysRequest, ListenerResponseBody, MapListenerRequest, PageRequest, QueryRequest,
    ValueRequest,
};
use crate::proxy::proto::Empty;
use crate::proxy::service::NamedCacheService;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use prost::Message;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tonic::codegen::http::{header, HeaderMap, HeaderValue, StatusCode};
use tonic::Status;
use tracing::{debug, info, warn};

/// Decode one gRPC message from a complete frame buffer (strips the
/// 5-byte header).
#[allow(clippy::result_large_err)]
fn decode_grpc_message<M: Message + Default>(body: &Bytes, max_size: usize) -> Result<M, Status> {
    if body.len() < 5 {
        return Err(Status::invalid_argument("gRPC message too short"));
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if len > max_size {
        return Err(Status::resource_exhausted(format!(
            "gRPC message of {len} bytes exceeds the {max_size} byte limit"
        )));
    }
    if body.len() < 5 + len {
        return Err(Status::invalid_argument(format!(
            "gRPC message truncated: expected {} bytes, got {}",
            len,
            body.len() - 5
        )));
    }
    let msg_bytes = &body[5..5 + len];
    M::decode(msg_bytes).map_err(|e| Status::invalid_argument(format!("decode error: {e}")))
}

/// Encode one gRPC message (adds the 5-byte header).
fn encode_grpc_message<M: Message>(msg: &M) -> Bytes {
    let encoded = msg.encode_to_vec();
    let mut buf = BytesMut::with_capacity(5 + encoded.len());
    buf.put_u8(0); // not compressed
    buf.put_u32(encoded.len() as u32);
    buf.put_slice(&encoded);
    buf.freeze()
}

/// Split complete gRPC frames off the front of an accumulation buffer.
#[allow(clippy::result_large_err)]
fn drain_frames(buffer: &mut BytesMut, max_size: usize) -> Result<Vec<Bytes>, Status> {
    let mut frames = Vec::new();
    loop {
        if buffer.len() < 5 {
            return Ok(frames);
        }
        let len = u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]) as usize;
        if len > max_size {
            return Err(Status::resource_exhausted(format!(
                "gRPC message of {len} bytes exceeds the {max_size} byte limit"
            )));
        }
        if buffer.len() < 5 + len {
            return Ok(frames);
        }
        let mut frame = buffer.split_to(5 + len).freeze();
        frame.advance(5);
        frames.push(frame);
    }
}

fn ok_trailers() -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    trailers
}

fn status_trailers(status: &Status) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert(
        "grpc-status",
        HeaderValue::from_str(&(status.code() as i32).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("2")),
    );
    if let Ok(message) = HeaderValue::from_str(status.message()) {
        trailers.insert("grpc-message", message);
    }
    trailers
}

/// Body for unary and server-streaming responses: a fixed frame
/// sequence followed by OK trailers.
struct FramesBody {
    frames: VecDeque<Bytes>,
    trailers_sent: bool,
}

impl FramesBody {
    fn new(frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            trailers_sent: false,
        }
    }
}

impl http_body::Body for FramesBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        if let Some(frame) = self.frames.pop_front() {
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::data(frame))));
        }
        if !self.trailers_sent {
            self.trailers_sent = true;
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(ok_trailers()))));
        }
        std::task::Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty() && self.trailers_sent
    }
}

/// Body for the events stream: frames arrive over a channel until the
/// sender side closes or reports a terminal status.
struct ChannelBody {
    rx: mpsc::UnboundedReceiver<Result<Bytes, Status>>,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl ChannelBody {
    fn new(rx: mpsc::UnboundedReceiver<Result<Bytes, Status>>) -> Self {
        Self {
            rx,
            trailers: None,
            done: false,
        }
    }
}

impl http_body::Body for ChannelBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        if self.done {
            return std::task::Poll::Ready(None);
        }
        if let Some(trailers) = self.trailers.take() {
            self.done = true;
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(trailers))));
        }
        match self.rx.poll_recv(cx) {
            std::task::Poll::Pending => std::task::Poll::Pending,
            std::task::Poll::Ready(Some(Ok(frame))) => {
                std::task::Poll::Ready(Some(Ok(http_body::Frame::data(frame))))
            }
            std::task::Poll::Ready(Some(Err(status))) => {
                self.done = true;
                self.rx.close();
                std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(status_trailers(
                    &status,
                )))))
            }
            std::task::Poll::Ready(None) => {
                self.done = true;
                std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(ok_trailers()))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

fn grpc_response<B>(body: B) -> tonic::codegen::http::Response<tonic::body::BoxBody>
where
    B: http_body::Body<Data = Bytes, Error = Status> + Send + 'static,
{
    tonic::codegen::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/grpc")
        .body(tonic::body::BoxBody::new(body))
        .unwrap()
}

fn grpc_error_response(status: Status) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    status.into_http()
}

/// Encode a unary result or map its error to a terminal status.
fn respond<M: Message>(
    service: &NamedCacheService,
    result: GateResult<M>,
) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    match result {
        Ok(message) => grpc_response(FramesBody::new([encode_grpc_message(&message)])),
        Err(error) => {
            service.stats().record_error();
            grpc_error_response(to_status(error))
        }
    }
}

/// Encode a server-streaming result, one frame per item.
fn respond_stream<M: Message>(
    service: &NamedCacheService,
    result: GateResult<Vec<M>>,
) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    match result {
        Ok(items) => grpc_response(FramesBody::new(
            items.iter().map(encode_grpc_message).collect::<Vec<_>>(),
        )),
        Err(error) => {
            service.stats().record_error();
            grpc_error_response(to_status(error))
        }
    }
}

/// Read body frames until one complete gRPC message is buffered.
async fn collect_message<B>(body: B, max_size: usize) -> Result<Bytes, Status>
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    let mut data = BytesMut::new();
    let mut pinned = std::pin::pin!(body);
    loop {
        match pinned.as_mut().frame().await {
            Some(Ok(frame)) => {
                if frame.is_data() {
                    if let Ok(chunk) = frame.into_data() {
                        data.extend_from_slice(&chunk.into());
                        if data.len() >= 5 {
                            let len =
                                u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
                            if len > max_size {
                                return Err(Status::resource_exhausted(format!(
                                    "gRPC message of {len} bytes exceeds the {max_size} byte limit"
                                )));
                            }
                            if data.len() >= 5 + len {
                                break;
                            }
                        }
                    }
                } else if frame.is_trailers() {
                    break;
                }
            }
            Some(Err(error)) => {
                debug!("error reading request body: {}", error.into());
                return Err(Status::internal("failed to read request body"));
            }
            None => break,
        }
    }
    Ok(data.freeze())
}

/// The tonic service for the gridgate.v1 cache protocol.
#[derive(Clone)]
pub struct CacheServiceServer {
    service: Arc<NamedCacheService>,
    max_message_size: usize,
}

impl CacheServiceServer {
    pub fn new(service: Arc<NamedCacheService>, max_message_size: usize) -> Self {
        Self {
            service,
            max_message_size,
        }
    }

    /// Drive one bidirectional events stream.
    fn events<B>(&self, body: B) -> tonic::codegen::http::Response<tonic::body::BoxBody>
    where
        B: tonic::codegen::Body + Send + 'static,
        B::Data: Into<Bytes> + Send,
        B::Error: Into<tonic::codegen::StdError> + Send + 'static,
    {
        let (handle, mut responses) = self.service.open_events();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Result<Bytes, Status>>();

        // Outbound pump: proxy responses become body frames. Ends when
        // the stream's sink closes (teardown or cache destroy).
        let forward_tx = out_tx.clone();
        let stats_service = self.service.clone();
        tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                if matches!(response.body, Some(ListenerResponseBody::Event(_))) {
                    stats_service.stats().record_event();
                }
                if forward_tx
                    .send(Ok(encode_grpc_message(&response)))
                    .is_err()
                {
                    break;
                }
            }
        });

        // Inbound pump: request frames become subscription changes. The
        // handle is dropped when the client half ends, tearing down
        // every registration the stream holds.
        let max_size = self.max_message_size;
        tokio::spawn(async move {
            let mut pinned = std::pin::pin!(body);
            let mut buffer = BytesMut::new();
            loop {
                match pinned.as_mut().frame().await {
                    Some(Ok(frame)) => {
                        if frame.is_trailers() {
                            break;
                        }
                        let Ok(chunk) = frame.into_data() else {
                            continue;
                        };
                        buffer.extend_from_slice(&chunk.into());
                        let frames = match drain_frames(&mut buffer, max_size) {
                            Ok(frames) => frames,
                            Err(status) => {
                                let _ = out_tx.send(Err(status));
                                break;
                            }
                        };
                        for raw in frames {
                            let request = match MapListenerRequest::decode(raw.as_ref()) {
                                Ok(request) => request,
                                Err(error) => {
                                    let _ = out_tx.send(Err(Status::invalid_argument(format!(
                                        "decode error: {error}"
                                    ))));
                                    return;
                                }
                            };
                            if let Err(error) = handle.process(request).await {
                                warn!(%error, "terminating events stream");
                                let _ = out_tx.send(Err(to_status(error)));
                                return;
                            }
                        }
                    }
                    Some(Err(error)) => {
                        debug!("events stream body error: {}", error.into());
                        break;
                    }
                    None => break,
                }
            }
            drop(handle);
        });

        grpc_response(ChannelBody::new(out_rx))
    }
}

impl tonic::server::NamedService for CacheServiceServer {
    const NAME: &'static str = "gridgate.v1.NamedCacheService";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for CacheServiceServer
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
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

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let server = self.clone();
        let path = req.uri().path().to_string();
        let service = server.service.clone();
        service.stats().record_request();

        if path == "/gridgate.v1.NamedCacheService/Events" {
            let response = server.events(req.into_body());
            return Box::pin(async move { Ok(response) });
        }

        let max_size = server.max_message_size;
        Box::pin(async move {
            let collected = match collect_message(req.into_body(), max_size).await {
                Ok(collected) => collected,
                Err(status) => return Ok(grpc_error_response(status)),
            };
            debug!(path = %path, body_len = collected.len(), "handling cache request");

            macro_rules! unary {
                ($ty:ty, $call:expr) => {
                    match decode_grpc_message::<$ty>(&collected, max_size) {
                        Ok(request) => respond(&service, $call(request).await),
                        Err(status) => grpc_error_response(status),
                    }
                };
            }
            macro_rules! streaming {
                ($ty:ty, $call:expr) => {
                    match decode_grpc_message::<$ty>(&collected, max_size) {
                        Ok(request) => respond_stream(&service, $call(request).await),
                        Err(status) => grpc_error_response(status),
                    }
                };
            }

            let response = match path.as_str() {
                "/gridgate.v1.NamedCacheService/Get" => {
                    unary!(KeyRequest, |r| service.get(r))
                }
                "/gridgate.v1.NamedCacheService/Put" => {
                    unary!(EntryRequest, |r| service.put(r))
                }
                "/gridgate.v1.NamedCacheService/PutAll" => {
                    match decode_grpc_message::<EntriesRequest>(&collected, max_size) {
                        Ok(request) => {
                            respond(&service, service.put_all(request).await.map(|_| Empty {}))
                        }
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/gridgate.v1.NamedCacheService/Remove" => {
                    unary!(KeyRequest, |r| service.remove(r))
                }
                "/gridgate.v1.NamedCacheService/Replace" => {
                    unary!(EntryRequest, |r| service.replace(r))
                }
                "/gridgate.v1.NamedCacheService/ContainsKey" => {
                    unary!(KeyRequest, |r| service.contains_key(r))
                }
                "/gridgate.v1.NamedCacheService/ContainsValue" => {
                    unary!(ValueRequest, |r| service.contains_value(r))
                }
                "/gridgate.v1.NamedCacheService/ContainsEntry" => {
                    unary!(EntryRequest, |r| service.contains_entry(r))
                }
                "/gridgate.v1.NamedCacheService/Size" => {
                    unary!(CacheRequest, |r| service.size(r))
                }
                "/gridgate.v1.NamedCacheService/IsEmpty" => {
                    unary!(CacheRequest, |r| service.is_empty(r))
                }
                "/gridgate.v1.NamedCacheService/Clear" => {
                    match decode_grpc_message::<CacheRequest>(&collected, max_size) {
                        Ok(request) => {
                            respond(&service, service.clear(request).await.map(|_| Empty {}))
                        }
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/gridgate.v1.NamedCacheService/Truncate" => {
                    match decode_grpc_message::<CacheRequest>(&collected, max_size) {
                        Ok(request) => {
                            respond(&service, service.truncate(request).await.map(|_| Empty {}))
                        }
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/gridgate.v1.NamedCacheService/Destroy" => {
                    match decode_grpc_message::<CacheRequest>(&collected, max_size) {
                        Ok(request) => {
                            respond(&service, service.destroy(request).await.map(|_| Empty {}))
                        }
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/gridgate.v1.NamedCacheService/AddIndex" => {
                    match decode_grpc_message::<IndexRequest>(&collected, max_size) {
                        Ok(request) => {
                            respond(&service, service.add_index(request).await.map(|_| Empty {}))
                        }
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/gridgate.v1.NamedCacheService/RemoveIndex" => {
                    match decode_grpc_message::<IndexRequest>(&collected, max_size) {
                        Ok(request) => respond(
                            &service,
                            service.remove_index(request).await.map(|_| Empty {}),
                        ),
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/gridgate.v1.NamedCacheService/Invoke" => {
                    unary!(InvokeRequest, |r| service.invoke(r))
                }
                "/gridgate.v1.NamedCacheService/Aggregate" => {
                    unary!(AggregateRequest, |r| service.aggregate(r))
                }
                "/gridgate.v1.NamedCacheService/GetAll" => {
                    streaming!(KeysRequest, |r| service.get_all(r))
                }
                "/gridgate.v1.NamedCacheService/InvokeAll" => {
                    streaming!(InvokeRequest, |r| service.invoke_all(r))
                }
                "/gridgate.v1.NamedCacheService/KeySet" => {
                    streaming!(QueryRequest, |r| service.key_set(r))
                }
                "/gridgate.v1.NamedCacheService/EntrySet" => {
                    streaming!(QueryRequest, |r| service.entry_set(r))
                }
                "/gridgate.v1.NamedCacheService/Values" => {
                    streaming!(QueryRequest, |r| service.values(r))
                }
                "/gridgate.v1.NamedCacheService/NextKeyPage" => {
                    streaming!(PageRequest, |r| service.next_key_page(r))
                }
                "/gridgate.v1.NamedCacheService/NextEntryPage" => {
                    streaming!(PageRequest, |r| service.next_entry_page(r))
                }
                _ => {
                    warn!(path = %path, "unknown cache service method");
                    grpc_error_response(Status::unimplemented(format!(
                        "unknown method: {path}"
                    )))
                }
            };
            Ok(response)
        })
    }
}

/// The gridgate gRPC server.
pub struct CacheGrpcServer {
    bind_addr: SocketAddr,
    service: Arc<NamedCacheService>,
    max_message_size: usize,
    shutdown_rx: watch::Receiver<bool>,
}

impl CacheGrpcServer {
    pub fn new(
        bind_addr: SocketAddr,
        service: Arc<NamedCacheService>,
        max_message_size: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            service,
            max_message_size,
            shutdown_rx,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(self) -> anyhow::Result<()> {
        use tonic::transport::Server;

        let addr = self.bind_addr;
        let mut shutdown_rx = self.shutdown_rx;
        info!(%addr, "starting cache gRPC server");

        Server::builder()
            .add_service(CacheServiceServer::new(
                self.service.clone(),
                self.max_message_size,
            ))
            .serve_with_shutdown(addr, async move {
                loop {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                info!("cache gRPC server shutting down");
            })
            .await?;

        self.service.shutdown();
        Ok(())
    }
}
