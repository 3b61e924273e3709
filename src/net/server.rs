//! TCP server for control-plane requests.

use crate::error::{NetworkError, Result};
use crate::net::message::{decode_message, encode_message_into, Message, MAX_CONTROL_FRAME};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handler for incoming control messages.
pub trait ControlHandler: Send + Sync + 'static {
    /// Handle an incoming message and optionally return a response.
    fn handle(&self, msg: Message) -> Option<Message>;
}

/// Control server: accepts connections and answers framed requests.
pub struct ControlServer {
    bind_addr: SocketAddr,
    handler: Arc<dyn ControlHandler>,
    cancel: CancellationToken,
}

impl ControlServer {
    /// Create a server; `cancel` stops the accept loop and all connection
    /// handlers.
    pub fn new(
        bind_addr: SocketAddr,
        handler: Arc<dyn ControlHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bind_addr,
            handler,
            cancel,
        }
    }

    /// Bind and return the listening address (useful with port 0).
    pub async fn bind(self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(NetworkError::Io)?;
        let addr = listener.local_addr().map_err(NetworkError::Io)?;
        info!(%addr, "control server listening");

        let handle = tokio::spawn(accept_loop(listener, self.handler, self.cancel));
        Ok((addr, handle))
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ControlHandler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("control server shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted control connection");
                        let handler = handler.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, cancel).await {
                                debug!(%peer, error = %e, "control connection ended");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn ControlHandler>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = stream.read_exact(&mut len_buf) => {
                match read {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(NetworkError::Io(e).into()),
                }
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_CONTROL_FRAME {
            return Err(NetworkError::FrameTooLarge(len).into());
        }

        let mut data = vec![0u8; len];
        stream
            .read_exact(&mut data)
            .await
            .map_err(NetworkError::Io)?;

        let msg = decode_message(&data)?;
        if let Some(response) = handler.handle(msg) {
            let mut buf = BytesMut::new();
            encode_message_into(&response, &mut buf)?;
            stream.write_all(&buf).await.map_err(NetworkError::Io)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::client;
    use crate::types::HealthStatus;
    use std::time::Duration;

    struct StaticHandler;

    impl ControlHandler for StaticHandler {
        fn handle(&self, msg: Message) -> Option<Message> {
            match msg {
                Message::HealthQuery { .. } => Some(Message::HealthStatus(HealthStatus {
                    target_id: "srv".to_string(),
                    is_rebalancing: false,
                })),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn test_request_response() {
        let cancel = CancellationToken::new();
        let server = ControlServer::new(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(StaticHandler),
            cancel.clone(),
        );
        let (addr, handle) = server.bind().await.unwrap();

        let resp = client::call(
            addr,
            &Message::HealthQuery {
                from_id: "me".to_string(),
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        match resp {
            Message::HealthStatus(hs) => {
                assert_eq!(hs.target_id, "srv");
                assert!(!hs.is_rebalancing);
            }
            other => panic!("wrong response: {other:?}"),
        }

        cancel.cancel();
        let _ = handle.await;
    }
}
