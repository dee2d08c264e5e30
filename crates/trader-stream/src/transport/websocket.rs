//! tokio-tungstenite 기반 WebSocket 전송.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Connector, Frame, TransportSocket};
use crate::error::{StreamError, StreamResult};

/// WebSocket 커넥터.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> StreamResult<Box<dyn TransportSocket>> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| StreamError::Transport(format!("WebSocket 연결 실패: {}", e)))?;

        debug!(status = %response.status(), "WebSocket 핸드셰이크 완료");
        Ok(Box::new(WsSocket { inner: ws_stream }))
    }
}

/// WebSocket 소켓.
pub struct WsSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportSocket for WsSocket {
    async fn send_text(&mut self, text: String) -> StreamResult<()> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(StreamError::from)
    }

    async fn next_frame(&mut self) -> Option<StreamResult<Frame>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        warn!(len = data.len(), "UTF-8이 아닌 바이너리 프레임 무시");
                    }
                },
                Ok(Message::Close(frame)) => {
                    return Some(Ok(Frame::Close(frame.map(|f| u16::from(f.code)))));
                }
                // Ping에 대한 Pong은 tungstenite에서 자동으로 처리됨
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> StreamResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.inner.close(Some(frame)).await.map_err(StreamError::from)
    }
}
