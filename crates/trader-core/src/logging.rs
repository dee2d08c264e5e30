//! tracing 기반 로깅 초기화.
//!
//! 스트리밍 클라이언트와 CLI가 공통으로 사용하는 구조화 로깅 설정입니다:
//! - **pretty**: 개발용 사람이 읽기 쉬운 형식
//! - **json**: 운영환경/로그 집계용 JSON 형식
//! - **compact**: 고빈도 시세 로그를 줄이기 위한 한 줄 형식
//!
//! 레벨은 `RUST_LOG`, 형식은 `LOG_FORMAT` 환경 변수가 설정 파일보다 우선합니다.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// 로그 형식을 덮어쓰는 환경 변수.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 색상이 포함된 사람이 읽기 쉬운 형식 (개발용)
    #[default]
    Pretty,
    /// 로그 집계용 JSON 형식 (운영용)
    Json,
    /// 간결한 한 줄 형식
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("알 수 없는 로그 형식: {}", s)),
        }
    }
}

/// 로깅 초기화 설정.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// 로그 레벨 필터 (예: "info", "trader_stream=debug")
    pub level: String,
    pub format: LogFormat,
    /// 파일명과 줄 번호 포함 여부
    pub with_file: bool,
}

impl LogConfig {
    /// 설정 파일의 로깅 섹션에 `LOG_FORMAT` 환경 변수를 적용합니다.
    pub fn from_logging(config: &LoggingConfig) -> Self {
        Self::resolve(config, std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    /// `format_override`가 올바른 형식이면 설정 파일 값보다 우선합니다.
    fn resolve(config: &LoggingConfig, format_override: Option<&str>) -> Self {
        let format = format_override
            .and_then(|s| s.parse().ok())
            .or_else(|| config.format.parse().ok())
            .unwrap_or_default();

        Self {
            level: config.level.clone(),
            format,
            with_file: false,
        }
    }
}

/// 주어진 설정으로 로깅 시스템을 초기화합니다.
///
/// `RUST_LOG`가 설정되어 있으면 설정 파일의 레벨보다 우선합니다.
///
/// # 예제
///
/// ```no_run
/// use trader_core::config::LoggingConfig;
/// use trader_core::logging::{init_logging, LogConfig};
///
/// let config = LogConfig::from_logging(&LoggingConfig::default());
/// init_logging(config).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let with_file = config.with_file;
    let pretty = (config.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .pretty()
            .with_file(with_file)
            .with_line_number(with_file)
    });
    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_file(with_file)
            .with_line_number(with_file)
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .compact()
            .with_file(with_file)
            .with_line_number(with_file)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .try_init()?;

    tracing::info!(format = ?config.format, level = %config.level, "로깅 초기화 완료");
    Ok(())
}

/// 채널/심볼 컨텍스트 필드가 포함된 span을 생성하는 매크로.
#[macro_export]
macro_rules! stream_span {
    ($name:expr, $channel:expr) => {
        tracing::debug_span!($name, channel = %$channel)
    };
    ($name:expr, $channel:expr, $symbol:expr) => {
        tracing::debug_span!($name, channel = %$channel, symbol = %$symbol)
    };
}
