//! 설정 관리.
//!
//! 스트리밍 클라이언트와 로깅 설정을 정의하고 로드합니다.
//! 설정은 기본값 → TOML 파일 → `TRADER__*` 환경 변수 순서로 병합됩니다.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{TraderError, TraderResult};

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// 스트리밍 클라이언트 설정
    #[serde(default)]
    pub stream: StreamConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 실시간 스트리밍 클라이언트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// WebSocket 엔드포인트
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// 병합(coalescing) 플러시 간격 (밀리초)
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    /// 병합 대상 메시지 타입 (예: "price_update")
    #[serde(default = "default_coalesce_kinds")]
    pub coalesce_kinds: Vec<String>,
    /// 연결 시 자동 구독할 채널
    #[serde(default)]
    pub auto_channels: Vec<String>,
    /// 하트비트 설정
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// 재연결 설정
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// 송신 대기열 설정
    #[serde(default)]
    pub outbound: OutboundConfig,
    /// 라이프사이클 이벤트 브로드캐스트 버퍼 크기
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}
fn default_flush_interval() -> u64 {
    16
}
fn default_coalesce_kinds() -> Vec<String> {
    vec!["price_update".to_string(), "market_data_update".to_string()]
}
fn default_event_capacity() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            flush_interval_ms: default_flush_interval(),
            coalesce_kinds: default_coalesce_kinds(),
            auto_channels: Vec::new(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            outbound: OutboundConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl StreamConfig {
    /// 플러시 간격을 Duration으로 반환합니다.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// 설정 값의 일관성을 검증합니다.
    pub fn validate(&self) -> TraderResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(TraderError::Config("stream.endpoint가 비어 있습니다".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(TraderError::Config(
                "stream.flush_interval_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(TraderError::Config(
                "stream.reconnect.base_delay_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(TraderError::Config(format!(
                "stream.reconnect.max_delay_ms({})가 base_delay_ms({})보다 작습니다",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }
        if self.outbound.capacity == 0 {
            return Err(TraderError::Config(
                "stream.outbound.capacity는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.outbound.write_timeout_ms == 0 {
            return Err(TraderError::Config(
                "stream.outbound.write_timeout_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(TraderError::Config(
                "stream.event_capacity는 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }
}

/// 하트비트(ping/pong) 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    /// ping 전송 간격 (밀리초, 0이면 비활성화)
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
    /// pong 대기 타임아웃 (밀리초)
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    30_000
}
fn default_heartbeat_timeout() -> u64 {
    10_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl HeartbeatConfig {
    /// ping 간격.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// pong 타임아웃.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 재연결 백오프 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    /// 첫 재연결 대기 시간 (밀리초)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// 최대 재연결 대기 시간 (밀리초)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// 최대 재연결 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// 기본 대기 시간.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// 최대 대기 시간.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// 송신 대기열 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// 연결 해제 중 보관할 최대 명령 수 (초과 시 가장 오래된 명령 폐기)
    #[serde(default = "default_outbound_capacity")]
    pub capacity: usize,
    /// 소켓 쓰기/종료 대기 한도 (ms). 초과하면 연결이 끊긴 것으로 처리합니다.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_outbound_capacity() -> usize {
    1024
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

impl OutboundConfig {
    /// 소켓 쓰기 대기 한도.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            capacity: default_outbound_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        Self::build(config::File::from(path.as_ref()))
    }

    /// 기본 경로(`config/default.toml`)에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::build(config::File::with_name("config/default").required(false))
    }

    /// TOML 문자열에서 설정을 로드합니다. 환경 변수는 적용하지 않습니다.
    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn build<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let builder = config::Config::builder()
            .add_source(file)
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("stream.auto_channels")
                    .with_list_parse_key("stream.coalesce_kinds")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
