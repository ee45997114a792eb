//! Framed TCP transport: one listener answers requests, another fans out
//! published events. Both speak length-delimited JSON frames.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::messages::{PubFrame, RequestFrame, ResponseFrame, RpcRequest, RpcResponse};

/// Server-side request dispatcher.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> RpcResponse;
}

/// Accept request/reply connections until the listener task is aborted.
pub fn spawn_request_listener<H>(listener: TcpListener, handler: Arc<H>) -> JoinHandle<()>
where
    H: RequestHandler + 'static,
{
    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "request listener accept failed");
                    continue;
                }
            };
            debug!(%peer, "rpc client connected");
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                serve_connection(stream, handler).await;
                debug!(%peer, "rpc client disconnected");
            });
        }
    })
}

async fn serve_connection<H>(stream: TcpStream, handler: Arc<H>)
where
    H: RequestHandler + 'static,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let request: RequestFrame = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "malformed request frame");
                break;
            }
        };
        let response = ResponseFrame {
            id: request.id,
            response: handler.handle(request.request).await,
        };
        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode response");
                break;
            }
        };
        if framed.send(Bytes::from(payload)).await.is_err() {
            break;
        }
    }
}

/// Fan-out hub between the event bus and publish connections.
#[derive(Clone)]
pub struct Publisher {
    tx: broadcast::Sender<PubFrame>,
}

impl Publisher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Drop-on-no-subscribers is fine: publishing is fire-and-forget.
    pub fn publish(&self, frame: PubFrame) {
        let _ = self.tx.send(frame);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PubFrame> {
        self.tx.subscribe()
    }
}

/// Accept publish connections; each subscriber receives every frame from
/// the moment it connects.
pub fn spawn_publish_listener(listener: TcpListener, publisher: Publisher) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "publish listener accept failed");
                    continue;
                }
            };
            info!(%peer, "event subscriber connected");
            let mut rx = publisher.subscribe();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
                loop {
                    let frame = match rx.recv().await {
                        Ok(frame) => frame,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(%peer, missed, "subscriber lagging; frames dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    let payload = match serde_json::to_vec(&frame) {
                        Ok(payload) => payload,
                        Err(_) => continue,
                    };
                    if framed.send(Bytes::from(payload)).await.is_err() {
                        break;
                    }
                }
                info!(%peer, "event subscriber disconnected");
            });
        }
    })
}
