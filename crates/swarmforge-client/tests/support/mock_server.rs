use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

/// Frames the test pushes to every connected client.
#[derive(Debug, Clone)]
pub enum Push {
    Text(String),
    Close,
    /// Drop the TCP stream without a close frame.
    Drop,
}

pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Loopback orchestrator that records what it receives and answers through
/// an optional responder.
pub struct MockServer {
    port: u16,
    push_tx: broadcast::Sender<Push>,
    received_rx: mpsc::UnboundedReceiver<String>,
}

impl MockServer {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(None).await
    }

    pub async fn with_responder(
        responder: impl Fn(&str) -> Vec<String> + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        Self::start_with(Some(Arc::new(responder))).await
    }

    async fn start_with(responder: Option<Responder>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (push_tx, _) = broadcast::channel(64);
        let (received_tx, received_rx) = mpsc::unbounded_channel();

        let accept_push = push_tx.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let push_rx = accept_push.subscribe();
                let received_tx = received_tx.clone();
                let responder = responder.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, push_rx, received_tx, responder).await;
                });
            }
        });

        Ok(Self {
            port,
            push_tx,
            received_rx,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(Push::Text(text.into()));
    }

    pub fn close_clients(&self) {
        let _ = self.push_tx.send(Push::Close);
    }

    pub fn drop_clients(&self) {
        let _ = self.push_tx.send(Push::Drop);
    }

    /// Next text frame received from any client.
    pub async fn next_received(&mut self, wait: Duration) -> anyhow::Result<String> {
        tokio::time::timeout(wait, self.received_rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no frame received within {wait:?}"))?
            .ok_or_else(|| anyhow::anyhow!("mock server stopped"))
    }
}

async fn serve(
    stream: TcpStream,
    mut push_rx: broadcast::Receiver<Push>,
    received_tx: mpsc::UnboundedSender<String>,
    responder: Option<Responder>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str().to_string();
                        let replies = responder
                            .as_ref()
                            .map(|respond| respond(&text))
                            .unwrap_or_default();
                        let _ = received_tx.send(text);
                        for reply in replies {
                            sink.send(Message::Text(reply.into())).await?;
                        }
                    }
                    // Keep reading so the close reply gets flushed.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            push = push_rx.recv() => {
                match push {
                    Ok(Push::Text(text)) => sink.send(Message::Text(text.into())).await?,
                    Ok(Push::Close) => {
                        sink.send(Message::Close(None)).await?;
                    }
                    Ok(Push::Drop) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(())
}
