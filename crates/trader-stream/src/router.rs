//! 수신 메시지 라우팅.
//!
//! 텍스트 프레임을 파싱하여 제어 메시지와 채널 이벤트로 분류하고,
//! 축약 인코딩된 가격 페이로드를 표준 형태로 확장합니다.

use chrono::Utc;
use serde_json::Value;

use crate::error::StreamResult;
use crate::messages::{ChannelEvent, DataFrame, MessageKind, ServerMessage};

/// 축약 키 → 표준 키 매핑.
const COMPACT_PRICE_KEYS: [(&str, &str); 5] = [
    ("s", "symbol"),
    ("p", "price"),
    ("c", "change"),
    ("cp", "changePercent"),
    ("t", "timestamp"),
];

/// 라우팅 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// 서버 연결 확인
    Connected { session_id: Option<String> },
    /// 구독 확인
    Subscribed { channels: Vec<String> },
    /// 하트비트 응답
    Pong,
    /// 리스너에게 전달할 데이터
    Data(ChannelEvent),
    /// 무시할 메시지
    Unknown,
}

/// 텍스트 프레임을 라우팅합니다.
///
/// JSON이 아니거나 `type` 필드가 없으면 `StreamError::Protocol`을 반환합니다.
pub fn route(text: &str) -> StreamResult<Routed> {
    let routed = match ServerMessage::from_json(text)? {
        ServerMessage::Connected { session_id } => Routed::Connected {
            session_id: session_id.map(|id| match id {
                Value::String(id) => id,
                other => other.to_string(),
            }),
        },
        ServerMessage::Subscribed { channels } => Routed::Subscribed {
            channels: channel_names(channels),
        },
        ServerMessage::Pong { .. } => Routed::Pong,
        ServerMessage::PriceUpdate(frame) => Routed::Data(to_event(MessageKind::PriceUpdate, frame)),
        ServerMessage::OrderbookUpdate(frame) => {
            Routed::Data(to_event(MessageKind::OrderbookUpdate, frame))
        }
        ServerMessage::TradeUpdate(frame) => Routed::Data(to_event(MessageKind::TradeUpdate, frame)),
        ServerMessage::CandleUpdate(frame) => {
            Routed::Data(to_event(MessageKind::CandleUpdate, frame))
        }
        ServerMessage::MarketDataUpdate(frame) => {
            Routed::Data(to_event(MessageKind::MarketDataUpdate, frame))
        }
        ServerMessage::Unknown => Routed::Unknown,
    };
    Ok(routed)
}

/// 구독 확인의 채널 목록. 문자열 배열이 아니면 문자열 항목만 취합니다.
fn channel_names(channels: Option<Value>) -> Vec<String> {
    match channels {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect(),
        Some(Value::String(name)) => vec![name],
        _ => Vec::new(),
    }
}

fn to_event(kind: MessageKind, frame: DataFrame) -> ChannelEvent {
    let DataFrame {
        channel,
        symbol,
        mut data,
    } = frame;

    if kind.is_price_like() {
        expand_compact_price(&mut data);
    }

    // 봉투에 심볼이 없으면 페이로드의 심볼 사용
    let symbol = symbol.or_else(|| {
        data.get("symbol")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    ChannelEvent {
        kind,
        channel: channel.unwrap_or_else(|| kind.default_channel().to_string()),
        symbol,
        data,
        received_at: Utc::now(),
    }
}

/// 축약 가격 페이로드(`s`, `p`, `c`, `cp`, `t`)를 표준 필드로 확장합니다.
///
/// `t`는 초 단위이며 밀리초로 변환됩니다. 표준 필드가 이미 있는 키는 건드리지 않으며,
/// 확장한 키가 없으면 `false`를 반환합니다.
pub fn expand_compact_price(data: &mut Value) -> bool {
    let Some(map) = data.as_object_mut() else {
        return false;
    };

    let mut expanded = false;
    for (short, long) in COMPACT_PRICE_KEYS {
        if map.contains_key(long) {
            continue;
        }
        if let Some(value) = map.remove(short) {
            let value = if short == "t" {
                seconds_to_millis(value)
            } else {
                value
            };
            map.insert(long.to_string(), value);
            expanded = true;
        }
    }
    expanded
}

fn seconds_to_millis(value: Value) -> Value {
    if let Some(secs) = value.as_i64() {
        return Value::from(secs.saturating_mul(1000));
    }
    match value.as_f64() {
        Some(secs) => Value::from((secs * 1000.0).round() as i64),
        None => value,
    }
}

/// 심볼 한정 채널 키(`SYMBOL:channel`)를 생성합니다.
pub fn composite_key(symbol: &str, channel: &str) -> String {
    format!("{}:{}", symbol, channel)
}

/// 이벤트를 받을 리스너 키 목록. 채널 키가 먼저, 심볼 한정 키가 뒤에 옵니다.
pub fn listener_keys(event: &ChannelEvent) -> Vec<String> {
    let mut keys = vec![event.channel.clone()];
    if let Some(symbol) = &event.symbol {
        keys.push(composite_key(symbol, &event.channel));
    }
    keys
}
