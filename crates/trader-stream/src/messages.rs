//! 스트리밍 메시지 타입.
//!
//! 클라이언트-서버 간 교환되는 JSON 메시지 정의.
//! 모든 메시지는 `type` 필드로 구분되는 태그 객체입니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trader_core::PriceTick;

use crate::error::{StreamError, StreamResult};

// ==================== 클라이언트 → 서버 메시지 ====================

/// 클라이언트에서 서버로 보내는 제어 메시지.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 채널 구독
    Subscribe {
        /// 구독할 채널 목록
        channels: Vec<String>,
        /// 심볼 한정 구독 시 대상 심볼
        #[serde(skip_serializing_if = "Vec::is_empty")]
        symbols: Vec<String>,
    },
    /// 채널 구독 해제
    Unsubscribe {
        /// 구독 해제할 채널 목록
        channels: Vec<String>,
        /// 심볼 한정 구독 해제 시 대상 심볼
        #[serde(skip_serializing_if = "Vec::is_empty")]
        symbols: Vec<String>,
    },
    /// 핑 (연결 유지)
    Ping,
}

impl ClientMessage {
    /// 단일 채널 구독 메시지를 생성합니다.
    pub fn subscribe(channel: impl Into<String>, symbol: Option<String>) -> Self {
        ClientMessage::Subscribe {
            channels: vec![channel.into()],
            symbols: symbol.into_iter().collect(),
        }
    }

    /// 단일 채널 구독 해제 메시지를 생성합니다.
    pub fn unsubscribe(channel: impl Into<String>, symbol: Option<String>) -> Self {
        ClientMessage::Unsubscribe {
            channels: vec![channel.into()],
            symbols: symbol.into_iter().collect(),
        }
    }

    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> StreamResult<String> {
        serde_json::to_string(self).map_err(StreamError::from)
    }
}

/// 송신 대기열에 들어가는 메시지.
///
/// 제어 메시지 외에 애플리케이션 페이로드(주문 등)는 그대로 전송합니다.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// 구독/핑 등 제어 메시지
    Control(ClientMessage),
    /// 애플리케이션 페이로드
    Payload(Value),
}

impl OutboundMessage {
    /// 전송할 JSON 텍스트를 생성합니다.
    pub fn to_json(&self) -> StreamResult<String> {
        match self {
            OutboundMessage::Control(message) => message.to_json(),
            OutboundMessage::Payload(value) => serde_json::to_string(value).map_err(StreamError::from),
        }
    }
}

impl From<ClientMessage> for OutboundMessage {
    fn from(message: ClientMessage) -> Self {
        OutboundMessage::Control(message)
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        OutboundMessage::Payload(value)
    }
}

// ==================== 서버 → 클라이언트 메시지 ====================

/// 서버에서 클라이언트로 보내는 메시지.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 연결 확인
    Connected {
        #[serde(default, alias = "sessionId")]
        session_id: Option<Value>,
    },
    /// 구독 확인
    Subscribed {
        #[serde(default)]
        channels: Option<Value>,
    },
    /// 퐁 응답. 부가 필드의 형식은 따지지 않습니다.
    Pong {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    /// 가격 업데이트
    PriceUpdate(DataFrame),
    /// 호가창 업데이트
    OrderbookUpdate(DataFrame),
    /// 체결 업데이트
    TradeUpdate(DataFrame),
    /// 캔들 업데이트
    CandleUpdate(DataFrame),
    /// 통합 시세 업데이트
    MarketDataUpdate(DataFrame),
    /// 알 수 없는 타입
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> StreamResult<Self> {
        serde_json::from_str(json).map_err(StreamError::from)
    }
}

/// 데이터 메시지 본문.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataFrame {
    /// 명시적 채널 (없으면 메시지 타입의 기본 채널)
    #[serde(default)]
    pub channel: Option<String>,
    /// 대상 심볼
    #[serde(default)]
    pub symbol: Option<String>,
    /// 페이로드
    #[serde(default)]
    pub data: Value,
}

// ==================== 라우팅 타입 ====================

/// 데이터 메시지 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PriceUpdate,
    OrderbookUpdate,
    TradeUpdate,
    CandleUpdate,
    MarketDataUpdate,
}

impl MessageKind {
    /// 전체 메시지 종류.
    pub const ALL: [MessageKind; 5] = [
        MessageKind::PriceUpdate,
        MessageKind::OrderbookUpdate,
        MessageKind::TradeUpdate,
        MessageKind::CandleUpdate,
        MessageKind::MarketDataUpdate,
    ];

    /// 와이어 상의 `type` 값.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PriceUpdate => "price_update",
            MessageKind::OrderbookUpdate => "orderbook_update",
            MessageKind::TradeUpdate => "trade_update",
            MessageKind::CandleUpdate => "candle_update",
            MessageKind::MarketDataUpdate => "market_data_update",
        }
    }

    /// 메시지에 채널이 없을 때 사용할 기본 채널.
    pub fn default_channel(&self) -> &'static str {
        match self {
            MessageKind::PriceUpdate => "prices",
            MessageKind::OrderbookUpdate => "orderbook",
            MessageKind::TradeUpdate => "trades",
            MessageKind::CandleUpdate => "candles",
            MessageKind::MarketDataUpdate => "market_data",
        }
    }

    /// 가격 틱 형태의 페이로드를 갖는 종류인지 확인합니다.
    pub fn is_price_like(&self) -> bool {
        matches!(self, MessageKind::PriceUpdate | MessageKind::MarketDataUpdate)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown message kind: {}", s))
    }
}

/// 리스너에게 전달되는 정규화된 채널 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelEvent {
    /// 메시지 종류
    pub kind: MessageKind,
    /// 대상 채널
    pub channel: String,
    /// 대상 심볼
    pub symbol: Option<String>,
    /// 정규화된 페이로드
    pub data: Value,
    /// 수신 시각
    pub received_at: DateTime<Utc>,
}

impl ChannelEvent {
    /// 가격 틱 뷰를 반환합니다. 가격 형태가 아니면 `None`.
    pub fn price_tick(&self) -> Option<PriceTick> {
        PriceTick::from_value(&self.data)
    }
}
