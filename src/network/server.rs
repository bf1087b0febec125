use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::framing::{read_frame, write_frame};
use super::Dispatcher;
use crate::packets::{reply_value, Ack, ErrorKind, Message};
use crate::{debug, error, info, warn};

/// Inbound side of the transport. One framed request and one framed reply
/// per accepted connection, each connection on its own task.
pub struct NetServer {
    port: u16,
    dispatcher: Arc<Dispatcher>,
}

impl NetServer {
    pub fn new(port: u16, dispatcher: Arc<Dispatcher>) -> Self {
        NetServer { port, dispatcher }
    }

    /// Binds the listener, walking up from the configured port when it is
    /// taken (five attempts, like any other instance on this host would).
    async fn bind(&self) -> std::io::Result<TcpListener> {
        let mut port = self.port;
        loop {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    info!("network server listening on port {}", port);
                    return Ok(listener);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::AddrInUse && port < self.port + 4 =>
                {
                    warn!("port {} in use, trying {}", port, port + 1);
                    port += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let listener = match self.bind().await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("failed to start network server: {}", e);
                    return;
                }
            };

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("accepted connection from {}", addr);
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            handle_connection(dispatcher, stream).await;
                        });
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                }
            }
        })
    }
}

async fn handle_connection(dispatcher: Arc<Dispatcher>, mut stream: TcpStream) {
    let raw = match read_frame(&mut stream).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!("connection closed before a full request arrived: {}", e);
            return;
        }
    };

    let reply = match serde_json::from_slice::<Message>(&raw) {
        Ok(message) => dispatcher.dispatch(message).await,
        Err(e) => {
            warn!("unknown or malformed request: {}", e);
            reply_value(&Ack::error(ErrorKind::BadRequest, "unknown message type"))
        }
    };

    let payload = match serde_json::to_vec(&reply) {
        Ok(payload) => payload,
        Err(e) => {
            error!("failed to serialize reply: {}", e);
            return;
        }
    };

    if let Err(e) = write_frame(&mut stream, &payload).await {
        debug!("failed to write reply: {}", e);
    }
}
