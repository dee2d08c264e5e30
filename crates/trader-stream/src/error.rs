//! 스트리밍 클라이언트 에러 타입.

use std::time::Duration;
use thiserror::Error;

/// 스트리밍 관련 에러.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// 전송 계층 에러 (연결 실패, 송수신 실패, 비정상 종료)
    #[error("Transport error: {0}")]
    Transport(String),

    /// 수신 프레임 파싱 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// pong 응답 타임아웃
    #[error("Heartbeat timeout: no pong within {0:?}")]
    HeartbeatTimeout(Duration),

    /// 재연결 시도 횟수 소진
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    Terminal { attempts: u32 },

    /// 잘못된 엔드포인트
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// 클라이언트 태스크 종료
    #[error("Stream client closed")]
    Closed,
}

/// 스트리밍 작업을 위한 Result 타입.
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// 재연결로 복구 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_) | StreamError::HeartbeatTimeout(_)
        )
    }

    /// 더 이상 자동 복구하지 않는 에러인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamError::Terminal { .. } | StreamError::InvalidEndpoint(_) | StreamError::Closed
        )
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        StreamError::InvalidEndpoint(err.to_string())
    }
}
