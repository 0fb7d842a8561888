//! Minimal JSON WebSocket client

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// The `connection` acknowledgement received on connect
    pub ack: Value,
}

impl TestClient {
    /// Connect and consume the connection acknowledgement
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("Failed to connect");
        let mut client = Self {
            ws,
            ack: Value::Null,
        };
        client.ack = client.recv().await;
        client
    }

    pub fn client_id(&self) -> &str {
        self.ack["client_id"].as_str().unwrap_or_default()
    }

    pub async fn send(&mut self, msg: Value) {
        self.send_text(msg.to_string()).await;
    }

    pub async fn send_text(&mut self, text: String) {
        self.ws
            .send(Message::Text(text))
            .await
            .expect("Failed to send message");
    }

    pub async fn send_raw(&mut self, msg: Message) {
        self.ws.send(msg).await.expect("Failed to send frame");
    }

    /// Next JSON message, skipping control frames
    pub async fn recv(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => {
                    return serde_json::from_str(&text).expect("Server sent invalid JSON")
                }
                Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
                other => panic!("Expected a text message, got {:?}", other),
            }
        }
    }

    /// Send `msg` and wait for the reply
    pub async fn request(&mut self, msg: Value) -> Value {
        self.send(msg).await;
        self.recv().await
    }

    /// Wait for the server's close frame
    pub async fn expect_close(&mut self) -> Option<CloseFrame<'static>> {
        loop {
            match self.next_frame().await {
                Some(Message::Close(frame)) => return frame.map(|f| f.into_owned()),
                Some(Message::Text(text)) => panic!("Expected close, got message {}", text),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Next frame of any kind, control frames included
    pub async fn next_frame(&mut self) -> Option<Message> {
        match tokio::time::timeout(RECV_TIMEOUT, self.ws.next()).await {
            Ok(Some(Ok(msg))) => Some(msg),
            Ok(Some(Err(_))) | Ok(None) => None,
            Err(_) => panic!("Timed out waiting for the server"),
        }
    }
}
