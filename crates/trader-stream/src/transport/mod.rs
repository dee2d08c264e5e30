//! 전송 계층 추상화.
//!
//! 연결 관리자는 `Connector`/`TransportSocket` 트레이트를 통해서만 소켓을 다루므로
//! 테스트에서는 메모리 기반 구현으로 교체할 수 있습니다.

mod websocket;

pub use websocket::{WsConnector, WsSocket};

use async_trait::async_trait;

use crate::error::StreamResult;

/// 정상 종료 코드.
pub const NORMAL_CLOSURE: u16 = 1000;

/// 하트비트 타임아웃으로 클라이언트가 강제 종료할 때 사용하는 코드.
pub const HEARTBEAT_TIMEOUT_CLOSURE: u16 = 4000;

/// 수신 프레임.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// 텍스트 프레임
    Text(String),
    /// 종료 프레임 (종료 코드)
    Close(Option<u16>),
}

/// 열린 양방향 소켓.
#[async_trait]
pub trait TransportSocket: Send {
    /// 텍스트 프레임을 전송합니다.
    async fn send_text(&mut self, text: String) -> StreamResult<()>;

    /// 다음 프레임을 수신합니다. 스트림이 끝나면 `None`.
    ///
    /// 취소되어도 프레임이 유실되지 않아야 합니다.
    async fn next_frame(&mut self) -> Option<StreamResult<Frame>>;

    /// 종료 코드와 함께 소켓을 닫습니다.
    async fn close(&mut self, code: u16, reason: &str) -> StreamResult<()>;
}

/// 소켓 팩토리.
#[async_trait]
pub trait Connector: Send + Sync {
    /// URL로 연결을 엽니다.
    async fn connect(&self, url: &str) -> StreamResult<Box<dyn TransportSocket>>;
}
