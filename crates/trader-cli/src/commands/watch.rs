//! 실시간 스트림 모니터링.
//!
//! 지정한 채널을 구독하고 수신한 이벤트를 표준 출력으로 보여줍니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use trader_core::StreamConfig;
use trader_stream::{listener, ChannelEvent, ClientEvent, StreamClient};

/// watch 명령 설정.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// 스트림 설정
    pub stream: StreamConfig,
    /// 인증 토큰
    pub token: String,
    /// 구독할 채널 키 (`prices`, `BTCUSD:prices` 등)
    pub channels: Vec<String>,
    /// 실행 시간 (없으면 Ctrl+C까지)
    pub duration: Option<Duration>,
    /// 원본 JSON 출력 여부
    pub raw: bool,
}

/// 이벤트를 한 줄로 포맷합니다.
///
/// 가격 틱은 `심볼 가격 (변동률%)` 형식, 그 외에는 페이로드 JSON을 출력합니다.
pub fn format_event(event: &ChannelEvent, raw: bool) -> String {
    let time = event.received_at.format("%H:%M:%S%.3f");
    if !raw {
        if let Some(tick) = event.price_tick() {
            let arrow = if tick.is_up() {
                "▲"
            } else if tick.is_down() {
                "▼"
            } else {
                "-"
            };
            return format!(
                "{} [{}] {} {} {} ({}%)",
                time, event.channel, tick.symbol, tick.price, arrow, tick.change_percent
            );
        }
    }
    format!(
        "{} [{}] {}{}",
        time,
        event.channel,
        event
            .symbol
            .as_deref()
            .map(|s| format!("{} ", s))
            .unwrap_or_default(),
        event.data
    )
}

/// 스트림에 연결하여 이벤트를 출력합니다.
///
/// 재연결을 포기하면 에러를 반환합니다.
pub async fn run_watch(config: WatchConfig) -> Result<u64> {
    if config.channels.is_empty() && config.stream.auto_channels.is_empty() {
        bail!("구독할 채널이 없습니다. --channel 또는 stream.auto_channels를 지정하세요");
    }

    let endpoint = config.stream.endpoint.clone();
    let client = StreamClient::new(config.stream);
    let printed = Arc::new(AtomicU64::new(0));

    for channel in &config.channels {
        let counter = Arc::clone(&printed);
        let raw = config.raw;
        client.subscribe(
            channel.clone(),
            listener(move |event: &ChannelEvent| {
                counter.fetch_add(1, Ordering::Relaxed);
                println!("{}", format_event(event, raw));
            }),
        );
    }

    let mut events = client.events();
    client.connect(endpoint.clone(), config.token);
    info!(endpoint = %endpoint, channels = ?config.channels, "스트림 모니터링 시작");

    let deadline = tokio::time::sleep(config.duration.unwrap_or(Duration::from_secs(86_400 * 365)));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("중단 요청 수신");
                break;
            }
            _ = &mut deadline, if config.duration.is_some() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Connected) => info!("연결됨"),
                Ok(ClientEvent::Disconnected { code, reason }) => {
                    warn!(?code, reason = %reason, "연결 끊김");
                }
                Ok(ClientEvent::ReconnectScheduled { attempt, delay }) => {
                    info!(attempt, delay_ms = delay.as_millis() as u64, "재연결 대기");
                }
                Ok(ClientEvent::Error { error, terminal: true }) => {
                    client.disconnect();
                    bail!("스트림 연결 실패: {}", error);
                }
                Ok(ClientEvent::Error { error, .. }) => warn!(error = %error, "스트림 에러"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "이벤트 수신 지연"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
    if let Some(stats) = client.stats().await {
        info!(
            frames = stats.frames_received,
            protocol_errors = stats.protocol_errors,
            superseded = stats.superseded_updates,
            sessions = stats.sessions_opened,
            "스트림 모니터링 종료"
        );
    }
    Ok(printed.load(Ordering::Relaxed))
}
