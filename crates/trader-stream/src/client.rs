//! 스트리밍 클라이언트 핸들.
//!
//! `StreamClient`는 백그라운드 연결 태스크에 명령을 보내는 가벼운 핸들입니다.
//! 모든 상태는 연결 태스크가 소유하며, 호출자는 상태 watch 채널과
//! 라이프사이클 이벤트 브로드캐스트로 결과를 관찰합니다.
//!
//! # 예제
//!
//! ```no_run
//! use trader_stream::{listener, ChannelEvent, StreamClient};
//! use trader_core::StreamConfig;
//!
//! # async fn run() {
//! let client = StreamClient::new(StreamConfig::default());
//! client.subscribe("BTCUSD:prices", listener(|event: &ChannelEvent| {
//!     if let Some(tick) = event.price_tick() {
//!         println!("{} {}", tick.symbol, tick.price);
//!     }
//! }));
//! client.connect("wss://stream.example.com/ws", "token");
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;
use trader_core::StreamConfig;

use crate::error::StreamError;
use crate::manager::ConnectionManager;
use crate::messages::OutboundMessage;
use crate::registry::ListenerRef;
use crate::transport::{Connector, WsConnector};

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// 연결 해제됨 (재연결 대기 포함)
    Disconnected,
    /// 연결 중
    Connecting,
    /// 연결됨
    Open,
    /// 종료 중
    Closing,
}

/// 라이프사이클 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// 연결 성공
    Connected,
    /// 연결 종료
    Disconnected { code: Option<u16>, reason: String },
    /// 재연결 예약
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// 에러. `terminal`이면 자동 재연결을 중단한 상태입니다.
    Error { error: StreamError, terminal: bool },
}

/// 클라이언트 통계 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    pub status: ConnectionStatus,
    /// 등록된 채널 키 수
    pub channels: usize,
    /// 등록된 리스너 수
    pub listeners: usize,
    /// 송신 대기 명령 수
    pub pending_outbound: usize,
    /// 용량 초과로 폐기된 송신 명령 수
    pub dropped_outbound: u64,
    /// 병합 대기 업데이트 수
    pub pending_coalesced: usize,
    /// 병합으로 대체된 업데이트 수
    pub superseded_updates: u64,
    /// 수신 텍스트 프레임 수
    pub frames_received: u64,
    /// 파싱 실패 프레임 수
    pub protocol_errors: u64,
    /// 현재 연속 재연결 시도 횟수
    pub reconnect_attempt: u32,
    /// 열린 세션 수
    pub sessions_opened: u64,
    /// 마지막 하트비트 왕복 시간
    pub last_rtt: Option<Duration>,
}

/// 연결 태스크로 보내는 명령.
pub(crate) enum ClientCommand {
    Connect { endpoint: String, token: String },
    Disconnect,
    Subscribe { key: String, listener: ListenerRef },
    Unsubscribe { key: String, listener: ListenerRef },
    Send(OutboundMessage),
    Stats(oneshot::Sender<ClientStats>),
}

/// 실시간 스트리밍 클라이언트 핸들.
///
/// 마지막 핸들이 drop되면 연결 태스크가 소켓을 닫고 종료합니다.
#[derive(Clone)]
pub struct StreamClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<ClientEvent>,
}

impl StreamClient {
    /// WebSocket 전송으로 클라이언트를 생성합니다. Tokio 런타임 안에서 호출해야 합니다.
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// 지정한 커넥터로 클라이언트를 생성합니다.
    pub fn with_connector(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let manager = ConnectionManager::new(config, connector, command_rx, status_tx, events.clone());
        tokio::spawn(manager.run());

        Self {
            commands,
            status,
            events,
        }
    }

    /// 연결을 시작합니다.
    ///
    /// 이미 연결 중이거나 연결되어 있으면 무시됩니다. 재연결 대기 중이거나
    /// 재연결을 포기한 상태라면 즉시 연결하고 시도 횟수를 초기화합니다.
    pub fn connect(&self, endpoint: impl Into<String>, token: impl Into<String>) {
        self.dispatch(ClientCommand::Connect {
            endpoint: endpoint.into(),
            token: token.into(),
        });
    }

    /// 연결을 종료하고 자동 재연결을 중단합니다. 구독과 송신 대기열은 유지됩니다.
    pub fn disconnect(&self) {
        self.dispatch(ClientCommand::Disconnect);
    }

    /// 채널 키에 리스너를 등록합니다.
    ///
    /// 키는 `prices` 같은 채널 이름 또는 `BTCUSD:prices` 같은 심볼 한정 키입니다.
    pub fn subscribe(&self, key: impl Into<String>, listener: ListenerRef) {
        self.dispatch(ClientCommand::Subscribe {
            key: key.into(),
            listener,
        });
    }

    /// 리스너 등록을 해제합니다.
    pub fn unsubscribe(&self, key: impl Into<String>, listener: &ListenerRef) {
        self.dispatch(ClientCommand::Unsubscribe {
            key: key.into(),
            listener: Arc::clone(listener),
        });
    }

    /// 애플리케이션 페이로드를 전송합니다. 연결되어 있지 않으면 대기열에 보관됩니다.
    pub fn send(&self, payload: Value) {
        self.dispatch(ClientCommand::Send(OutboundMessage::Payload(payload)));
    }

    /// 현재 연결 상태.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// 연결 상태 변경을 관찰합니다.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// 라이프사이클 이벤트를 구독합니다.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// 통계 스냅샷을 조회합니다. 이전에 보낸 명령이 모두 처리된 뒤 응답합니다.
    pub async fn stats(&self) -> Option<ClientStats> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(ClientCommand::Stats(tx));
        rx.await.ok()
    }

    fn dispatch(&self, command: ClientCommand) {
        if self.commands.send(command).is_err() {
            warn!("스트림 클라이언트 태스크가 종료되어 명령을 처리할 수 없습니다");
        }
    }
}
