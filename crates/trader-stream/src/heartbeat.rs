//! 하트비트(ping/pong) 상태 추적.
//!
//! 타이머 자체는 연결 태스크가 소유하고, 여기서는 다음 ping 시각과
//! pong 마감 시각만 계산합니다.

use std::time::Duration;

use tokio::time::Instant;
use trader_core::HeartbeatConfig;

/// 하트비트 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// 중지됨
    Stopped,
    /// 다음 ping 대기
    Idle { next_ping: Instant },
    /// pong 대기
    AwaitingPong { sent_at: Instant },
    /// 타임아웃 발생
    Failed,
}

/// 하트비트 모니터.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    state: HeartbeatState,
    last_rtt: Option<Duration>,
}

impl HeartbeatMonitor {
    /// 간격이 0이면 비활성화됩니다.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            state: HeartbeatState::Stopped,
            last_rtt: None,
        }
    }

    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self::new(config.interval(), config.timeout())
    }

    /// 하트비트가 활성화되어 있는지 확인합니다.
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// 연결이 열리면 호출합니다.
    pub fn start(&mut self, now: Instant) {
        self.state = if self.is_enabled() {
            HeartbeatState::Idle {
                next_ping: now + self.interval,
            }
        } else {
            HeartbeatState::Stopped
        };
    }

    /// 연결이 닫히면 호출합니다.
    pub fn stop(&mut self) {
        self.state = HeartbeatState::Stopped;
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    /// pong 타임아웃.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 마지막 왕복 시간.
    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// 다음 ping 시각. pong 대기 중이면 `None`.
    pub fn next_ping_at(&self) -> Option<Instant> {
        match self.state {
            HeartbeatState::Idle { next_ping } => Some(next_ping),
            _ => None,
        }
    }

    /// pong 마감 시각. pong 대기 중이 아니면 `None`.
    pub fn pong_deadline(&self) -> Option<Instant> {
        match self.state {
            HeartbeatState::AwaitingPong { sent_at } => Some(sent_at + self.timeout),
            _ => None,
        }
    }

    /// ping을 보낸 직후 호출합니다.
    pub fn on_ping_sent(&mut self, now: Instant) {
        if let HeartbeatState::Idle { .. } = self.state {
            self.state = HeartbeatState::AwaitingPong { sent_at: now };
        }
    }

    /// pong 수신 시 호출합니다. 대기 중이던 ping의 왕복 시간을 반환합니다.
    pub fn on_pong(&mut self, now: Instant) -> Option<Duration> {
        let HeartbeatState::AwaitingPong { sent_at } = self.state else {
            return None;
        };
        let rtt = now.saturating_duration_since(sent_at);
        self.last_rtt = Some(rtt);
        self.state = HeartbeatState::Idle {
            next_ping: sent_at + self.interval,
        };
        Some(rtt)
    }

    /// pong 마감 시각이 지났을 때 호출합니다.
    ///
    /// 세션당 한 번만 `true`를 반환합니다.
    pub fn on_timeout(&mut self) -> bool {
        match self.state {
            HeartbeatState::AwaitingPong { .. } => {
                self.state = HeartbeatState::Failed;
                true
            }
            _ => false,
        }
    }
}
