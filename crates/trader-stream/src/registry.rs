//! 구독 레지스트리.
//!
//! 채널 키별 리스너 집합을 관리합니다. 채널 키는 일반 채널(`prices`)
//! 또는 심볼 한정 채널(`BTCUSD:prices`)입니다.
//!
//! 리스너 추가/제거 결과로 서버에 구독 명령을 보내야 하는지 알려주며,
//! 재연결 시 복원할 구독 목록을 제공합니다.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::messages::{ChannelEvent, ClientMessage};
use crate::router;

/// 채널 이벤트 리스너.
pub trait StreamListener: Send + Sync {
    /// 이벤트를 처리합니다. 연결 태스크에서 동기적으로 호출되므로 빠르게 반환해야 합니다.
    fn handle(&self, event: &ChannelEvent);
}

impl<F> StreamListener for F
where
    F: Fn(&ChannelEvent) + Send + Sync,
{
    fn handle(&self, event: &ChannelEvent) {
        self(event)
    }
}

/// 공유 리스너 참조. 동일성은 포인터로 판단합니다.
pub type ListenerRef = Arc<dyn StreamListener>;

/// 클로저로 리스너를 생성합니다.
pub fn listener<F>(f: F) -> ListenerRef
where
    F: Fn(&ChannelEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_listener(a: &ListenerRef, b: &ListenerRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// 파싱된 채널 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// 채널 이름
    pub channel: String,
    /// 심볼 한정 구독 시 심볼
    pub symbol: Option<String>,
}

impl ChannelKey {
    /// 문자열 키를 파싱합니다.
    ///
    /// # 형식
    ///
    /// - `{channel}` - 채널 전체
    /// - `{symbol}:{channel}` - 특정 심볼의 채널
    pub fn parse(key: &str) -> Self {
        match key.rsplit_once(':') {
            Some((symbol, channel)) if !symbol.is_empty() && !channel.is_empty() => Self {
                channel: channel.to_string(),
                symbol: Some(symbol.to_string()),
            },
            _ => Self {
                channel: key.to_string(),
                symbol: None,
            },
        }
    }

    /// 레지스트리 키 문자열.
    pub fn as_key(&self) -> String {
        match &self.symbol {
            Some(symbol) => router::composite_key(symbol, &self.channel),
            None => self.channel.clone(),
        }
    }

    /// 서버 구독 메시지.
    pub fn subscribe_message(&self) -> ClientMessage {
        ClientMessage::subscribe(self.channel.clone(), self.symbol.clone())
    }

    /// 서버 구독 해제 메시지.
    pub fn unsubscribe_message(&self) -> ClientMessage {
        ClientMessage::unsubscribe(self.channel.clone(), self.symbol.clone())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// 리스너 추가 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// 채널의 첫 리스너 (서버 구독 필요)
    FirstListener,
    /// 기존 채널에 추가됨
    Added,
    /// 이미 등록된 리스너
    Duplicate,
}

/// 리스너 제거 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// 마지막 리스너가 제거됨 (서버 구독 해제 필요)
    ChannelEmptied,
    /// 제거됨
    Removed,
    /// 등록되지 않은 리스너
    NotFound,
}

/// 채널 키 → 리스너 집합.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, Vec<ListenerRef>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 리스너를 추가합니다. 같은 리스너를 두 번 추가해도 한 번만 등록됩니다.
    pub fn add(&mut self, key: &str, listener: ListenerRef) -> AddOutcome {
        let listeners = self.channels.entry(key.to_string()).or_default();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return AddOutcome::Duplicate;
        }
        listeners.push(listener);
        if listeners.len() == 1 {
            AddOutcome::FirstListener
        } else {
            AddOutcome::Added
        }
    }

    /// 리스너를 제거합니다. 마지막 리스너가 빠지면 채널 항목도 제거됩니다.
    pub fn remove(&mut self, key: &str, listener: &ListenerRef) -> RemoveOutcome {
        let Some(listeners) = self.channels.get_mut(key) else {
            return RemoveOutcome::NotFound;
        };
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        if listeners.len() == before {
            return RemoveOutcome::NotFound;
        }
        if listeners.is_empty() {
            self.channels.remove(key);
            RemoveOutcome::ChannelEmptied
        } else {
            RemoveOutcome::Removed
        }
    }

    /// 키가 등록되어 있는지 확인합니다.
    pub fn contains(&self, key: &str) -> bool {
        self.channels.contains_key(key)
    }

    /// 키의 리스너 수.
    pub fn listener_count(&self, key: &str) -> usize {
        self.channels.get(key).map_or(0, Vec::len)
    }

    /// 등록된 채널 키 수.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 전체 리스너 수.
    pub fn total_listeners(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    /// 등록된 키 목록 (정렬됨).
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.channels.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 심볼 한정이 아닌 채널 이름 목록 (정렬, 중복 제거).
    pub fn plain_channels(&self) -> BTreeSet<String> {
        self.channels
            .keys()
            .map(|key| ChannelKey::parse(key))
            .filter(|key| key.symbol.is_none())
            .map(|key| key.channel)
            .collect()
    }

    /// 재연결 후 복원할 구독 메시지. 키마다 하나씩 생성합니다.
    pub fn replay_messages(&self) -> Vec<ClientMessage> {
        self.keys()
            .iter()
            .map(|key| ChannelKey::parse(key).subscribe_message())
            .collect()
    }

    /// 이벤트를 채널 리스너와 심볼 한정 리스너에게 전달합니다.
    ///
    /// 리스너의 패닉은 연결 태스크로 전파되지 않고 에러 로그로 남습니다.
    /// 정상 반환한 리스너 수를 반환합니다.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let span = match &event.symbol {
            Some(symbol) => trader_core::stream_span!("dispatch", event.channel, symbol),
            None => trader_core::stream_span!("dispatch", event.channel),
        };
        let _guard = span.enter();

        let mut delivered = 0;
        for key in router::listener_keys(event) {
            if let Some(listeners) = self.channels.get(&key) {
                for listener in listeners {
                    match panic::catch_unwind(AssertUnwindSafe(|| listener.handle(event))) {
                        Ok(()) => delivered += 1,
                        Err(payload) => error!(
                            key = %key,
                            panic = panic_message(payload.as_ref()),
                            "리스너 패닉 - 이벤트를 건너뜁니다"
                        ),
                    }
                }
            }
        }

        if delivered == 0 {
            debug!(kind = %event.kind, "구독자가 없는 이벤트 무시");
        }
        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .channels
            .iter()
            .map(|(key, listeners)| (key.as_str(), listeners.len()))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &counts)
            .finish()
    }
}
