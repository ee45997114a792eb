//! Client side of the wire protocol, used by terminal frontends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::messages::{PubFrame, RequestFrame, ResponseFrame, RpcRequest, RpcResponse};

/// Client-side transport failures.
#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("connection error: {0}")]
    Io(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Request/reply connection with correlation ids and a per-call timeout.
pub struct RpcClient {
    framed: Mutex<Framed<TcpStream, LengthDelimitedCodec>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RpcClient {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, RpcClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| RpcClientError::Io(err.to_string()))?;
        Ok(Self {
            framed: Mutex::new(Framed::new(stream, LengthDelimitedCodec::new())),
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    pub async fn request(&self, request: RpcRequest) -> Result<RpcResponse, RpcClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_vec(&RequestFrame { id, request })
            .map_err(|err| RpcClientError::Protocol(err.to_string()))?;

        let mut framed = self.framed.lock().await;
        framed
            .send(Bytes::from(payload))
            .await
            .map_err(|err| RpcClientError::Io(err.to_string()))?;

        loop {
            let frame = tokio::time::timeout(self.timeout, framed.next())
                .await
                .map_err(|_| RpcClientError::Timeout(self.timeout))?
                .ok_or_else(|| RpcClientError::Io("server closed the connection".into()))?
                .map_err(|err| RpcClientError::Io(err.to_string()))?;
            let response: ResponseFrame = serde_json::from_slice(&frame)
                .map_err(|err| RpcClientError::Protocol(err.to_string()))?;
            if response.id == id {
                return Ok(response.response);
            }
            // Stale reply from an abandoned call; keep waiting for ours.
        }
    }
}

/// Publisher-side subscription streaming every topic.
pub struct EventSubscription {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl EventSubscription {
    pub async fn connect(addr: &str) -> Result<Self, RpcClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| RpcClientError::Io(err.to_string()))?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        })
    }

    /// Next published frame; `None` when the server goes away.
    pub async fn next(&mut self) -> Option<PubFrame> {
        loop {
            let frame = self.framed.next().await?.ok()?;
            match serde_json::from_slice(&frame) {
                Ok(frame) => return Some(frame),
                Err(_) => continue,
            }
        }
    }
}
