//! 실시간 스트리밍 클라이언트.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 자동 재연결 WebSocket 클라이언트 (`StreamClient`)
//! - 메시지 라우팅 및 축약 페이로드 정규화
//! - 고빈도 업데이트 병합 (coalescing)
//! - 하트비트 기반 연결 상태 감지
//! - 채널/심볼 단위 구독 레지스트리
//! - 연결 해제 중 송신 명령 대기열

pub mod client;
pub mod coalescer;
pub mod error;
pub mod heartbeat;
mod manager;
pub mod messages;
pub mod outbound;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod transport;

pub use client::{ClientEvent, ClientStats, ConnectionStatus, StreamClient};
pub use coalescer::UpdateCoalescer;
pub use error::*;
pub use heartbeat::{HeartbeatMonitor, HeartbeatState};
pub use messages::{ChannelEvent, ClientMessage, MessageKind, OutboundMessage, ServerMessage};
pub use outbound::{OutboundQueue, PendingCommand};
pub use reconnect::{ReconnectPolicy, ReconnectState};
pub use registry::{listener, ChannelKey, ListenerRef, StreamListener, SubscriptionRegistry};
pub use router::Routed;
pub use transport::{Connector, Frame, TransportSocket, WsConnector};
