//! 스트리밍 클라이언트 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # BTCUSD 가격과 전체 체결 스트림 보기
//! trader watch -c BTCUSD:prices -c trades
//!
//! # 다른 엔드포인트로 60초 동안 보기
//! trader watch -e wss://stream.example.com/ws -c prices --duration 60
//!
//! # 유효 설정 확인 (파일 + TRADER__* 환경 변수 병합 결과)
//! trader config
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use trader_cli::commands::{load_config, run_watch, show_config, WatchConfig};
use trader_core::logging::{init_logging, LogConfig};

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "Trading stream CLI - 실시간 시세 스트림 클라이언트", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 (기본: config/default.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// 로그 레벨 (설정 파일보다 우선)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 채널을 구독하고 실시간 이벤트 출력
    Watch {
        /// WebSocket 엔드포인트 (기본: stream.endpoint)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// 인증 토큰 (기본: TRADER_STREAM_TOKEN 환경변수)
        #[arg(short, long)]
        token: Option<String>,

        /// 구독할 채널 키 (예: prices, BTCUSD:prices), 여러 번 지정 가능
        #[arg(short, long = "channel")]
        channels: Vec<String>,

        /// 실행 시간 (초, 지정하지 않으면 Ctrl+C까지)
        #[arg(short, long)]
        duration: Option<u64>,

        /// 가격 틱도 원본 JSON으로 출력
        #[arg(long, default_value = "false")]
        raw: bool,
    },

    /// 유효 설정을 JSON으로 출력
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env 파일이 있으면 로드
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let app = load_config(cli.config.as_deref())?;

    let mut log_config = LogConfig::from_logging(&app.logging);
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    init_logging(log_config).map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    match cli.command {
        Commands::Watch {
            endpoint,
            token,
            channels,
            duration,
            raw,
        } => {
            let mut stream = app.stream;
            if let Some(endpoint) = endpoint {
                stream.endpoint = endpoint;
            }
            stream.validate().context("스트림 설정이 올바르지 않습니다")?;

            let token = token
                .or_else(|| std::env::var("TRADER_STREAM_TOKEN").ok())
                .unwrap_or_default();

            let config = WatchConfig {
                stream,
                token,
                channels,
                duration: duration.map(Duration::from_secs),
                raw,
            };

            match run_watch(config).await {
                Ok(count) => info!("✅ 이벤트 {}건 수신", count),
                Err(e) => {
                    error!("Watch failed: {:#}", e);
                    return Err(e);
                }
            }
        }

        Commands::Config => {
            println!("{}", show_config(&app)?);
        }
    }

    Ok(())
}
