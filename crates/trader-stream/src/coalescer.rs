//! 고빈도 업데이트 병합.
//!
//! 가격처럼 최신 값만 의미 있는 업데이트를 `(채널, 심볼)` 단위로 모아
//! 플러시 간격마다 최신 값 하나만 전달합니다. 타이머는 첫 업데이트가
//! 들어올 때 무장되고 플러시 후 해제됩니다.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{trace, warn};

use crate::messages::{ChannelEvent, MessageKind};

/// 병합 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub channel: String,
    /// 심볼이 없는 이벤트는 채널 단위로 병합
    pub instrument: Option<String>,
}

impl BatchKey {
    fn of(event: &ChannelEvent) -> Self {
        Self {
            channel: event.channel.clone(),
            instrument: event.symbol.clone(),
        }
    }
}

/// 업데이트 병합기.
#[derive(Debug)]
pub struct UpdateCoalescer {
    kinds: HashSet<MessageKind>,
    interval: Duration,
    pending: HashMap<BatchKey, ChannelEvent>,
    /// 최초 도착 순서
    order: Vec<BatchKey>,
    flush_at: Option<Instant>,
    superseded: u64,
}

impl UpdateCoalescer {
    /// 병합 대상 종류와 플러시 간격으로 생성합니다.
    pub fn new(kinds: impl IntoIterator<Item = MessageKind>, interval: Duration) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            interval,
            pending: HashMap::new(),
            order: Vec::new(),
            flush_at: None,
            superseded: 0,
        }
    }

    /// 설정의 종류 이름 목록으로 생성합니다. 알 수 없는 이름은 경고 후 무시합니다.
    pub fn from_names(names: &[String], interval: Duration) -> Self {
        let kinds = names.iter().filter_map(|name| match name.parse::<MessageKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                warn!(error = %e, "병합 대상에서 제외합니다");
                None
            }
        });
        Self::new(kinds.collect::<Vec<_>>(), interval)
    }

    /// 병합 대상 종류인지 확인합니다.
    pub fn is_coalescable(&self, kind: MessageKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// 업데이트를 보관합니다. 같은 키의 이전 값을 대체했으면 `true`.
    pub fn push(&mut self, event: ChannelEvent, now: Instant) -> bool {
        let key = BatchKey::of(&event);
        let replaced = match self.pending.insert(key.clone(), event) {
            Some(_) => {
                self.superseded += 1;
                trace!(channel = %key.channel, "이전 업데이트 대체");
                true
            }
            None => {
                self.order.push(key);
                false
            }
        };

        if self.flush_at.is_none() {
            self.flush_at = Some(now + self.interval);
        }
        replaced
    }

    /// 다음 플러시 시각. 보관 중인 업데이트가 없으면 `None`.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    /// 플러시 시각이 지났는지 확인합니다.
    pub fn is_due(&self, now: Instant) -> bool {
        self.flush_at.is_some_and(|at| now >= at)
    }

    /// 보관 중인 업데이트를 최초 도착 순서로 꺼내고 타이머를 해제합니다.
    pub fn flush(&mut self) -> Vec<ChannelEvent> {
        self.flush_at = None;
        let mut pending = std::mem::take(&mut self.pending);
        self.order
            .drain(..)
            .filter_map(|key| pending.remove(&key))
            .collect()
    }

    /// 보관 중인 업데이트를 폐기하고 타이머를 해제합니다. 폐기된 수를 반환합니다.
    pub fn cancel(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.order.clear();
        self.flush_at = None;
        discarded
    }

    /// 보관 중인 업데이트 수.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 누적 대체 횟수.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}
