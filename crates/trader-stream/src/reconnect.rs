//! 재연결 백오프 정책.

use std::time::Duration;

use trader_core::ReconnectConfig;

/// 지수 백오프 정책.
///
/// `n`번째 시도 대기 시간은 `min(base * 2^(n-1), max_delay)`입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
        }
    }

    /// `attempt`번째(1부터) 시도 전 대기 시간.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// 연속 재연결 시도 추적.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// 다음 시도를 예약합니다. 최대 횟수를 넘으면 `None`.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some((self.attempt, self.policy.delay_for(self.attempt)))
    }

    /// 연결 성공 또는 수동 연결 시 카운터를 초기화합니다.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// 현재까지 예약된 연속 시도 횟수.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
