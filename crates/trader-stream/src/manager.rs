//! 연결 관리 태스크.
//!
//! 단일 태스크가 소켓, 구독 레지스트리, 병합기, 하트비트, 송신 대기열,
//! 재연결 상태를 모두 소유합니다. 명령과 프레임, 타이머는 하나의
//! `select!` 루프에서 순서대로 처리되므로 별도의 잠금이 필요 없습니다.
//!
//! # 상태 전이
//!
//! - `Idle` → connect → `Connecting`
//! - `Connecting` → 성공 → 세션 → 종료 사유에 따라 `Idle` 또는 `Backoff`
//! - `Connecting` → 실패 → `Backoff` (시도 횟수 소진 시 `Idle`)
//! - `Backoff` → 대기 완료 또는 connect → `Connecting`

use std::collections::BTreeSet;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant, Sleep};
use tracing::{debug, error, info, warn};
use trader_core::StreamConfig;
use url::Url;

use crate::client::{ClientCommand, ClientEvent, ClientStats, ConnectionStatus};
use crate::coalescer::UpdateCoalescer;
use crate::error::{StreamError, StreamResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::messages::{ClientMessage, OutboundMessage};
use crate::outbound::{self, OutboundQueue, PendingCommand};
use crate::reconnect::{ReconnectPolicy, ReconnectState};
use crate::registry::{AddOutcome, ChannelKey, RemoveOutcome, SubscriptionRegistry};
use crate::router::{self, Routed};
use crate::transport::{
    Connector, Frame, TransportSocket, HEARTBEAT_TIMEOUT_CLOSURE, NORMAL_CLOSURE,
};

type Socket = Box<dyn TransportSocket>;

/// 비활성 타이머에 사용하는 먼 미래 시각.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// 명령과 타이머를 확인하기 전에 연속으로 처리할 최대 프레임 수.
const MAX_FRAME_BURST: usize = 64;

/// 연결 대상.
#[derive(Debug, Clone)]
struct Target {
    endpoint: String,
    token: String,
}

/// 태스크 단계.
enum Phase {
    Idle,
    Connecting,
    Backoff(Instant),
    Shutdown,
}

/// 명령 처리 결과.
enum Flow {
    Continue,
    Connect,
    Disconnect,
    Failed(StreamError),
}

/// 세션 루프에서 발생한 이벤트.
enum SessionEvent {
    Frame(Option<StreamResult<Frame>>),
    Command(Option<ClientCommand>),
    PongTimeout,
    PingDue,
    Flush,
    /// 프레임 연속 처리 한도 도달, 대기 중인 명령/타이머 없음
    Yield,
}

/// 세션 종료 사유.
enum SessionEnd {
    /// 사용자 disconnect
    Manual,
    /// 서버가 정상 종료 코드로 닫음
    ServerClosed,
    /// 비정상 종료 (재연결 대상)
    Dropped { code: Option<u16>, error: StreamError },
    /// 모든 핸들이 drop됨
    Shutdown,
}

pub(crate) struct ConnectionManager {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ClientEvent>,
    registry: SubscriptionRegistry,
    coalescer: UpdateCoalescer,
    heartbeat: HeartbeatMonitor,
    outbound: OutboundQueue,
    reconnect: ReconnectState,
    target: Option<Target>,
    manual_disconnect: bool,
    write_timeout: Duration,
    frames_received: u64,
    protocol_errors: u64,
    sessions_opened: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<ClientCommand>,
        status: watch::Sender<ConnectionStatus>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let coalescer = UpdateCoalescer::from_names(&config.coalesce_kinds, config.flush_interval());
        let heartbeat = HeartbeatMonitor::from_config(&config.heartbeat);
        let outbound = OutboundQueue::new(config.outbound.capacity);
        let reconnect = ReconnectState::new(ReconnectPolicy::from_config(&config.reconnect));
        let write_timeout = config.outbound.write_timeout();

        Self {
            config,
            connector,
            commands,
            status,
            events,
            registry: SubscriptionRegistry::new(),
            coalescer,
            heartbeat,
            outbound,
            reconnect,
            target: None,
            manual_disconnect: false,
            write_timeout,
            frames_received: 0,
            protocol_errors: 0,
            sessions_opened: 0,
        }
    }

    /// 모든 핸들이 drop될 때까지 실행합니다.
    pub(crate) async fn run(mut self) {
        debug!("스트림 연결 태스크 시작");
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.run_idle().await,
                Phase::Connecting => self.run_connecting().await,
                Phase::Backoff(until) => self.run_backoff(until).await,
                Phase::Shutdown => break,
            };
        }
        debug!("스트림 연결 태스크 종료");
    }

    async fn run_idle(&mut self) -> Phase {
        loop {
            let Some(command) = self.commands.recv().await else {
                return Phase::Shutdown;
            };
            if let Flow::Connect = self.handle_command(command, None).await {
                return Phase::Connecting;
            }
        }
    }

    async fn run_connecting(&mut self) -> Phase {
        let url = match self.stream_url() {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "엔드포인트가 올바르지 않아 연결할 수 없습니다");
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ClientEvent::Error {
                    error: e,
                    terminal: true,
                });
                return Phase::Idle;
            }
        };

        self.set_status(ConnectionStatus::Connecting);
        info!(
            host = url.host_str().unwrap_or("-"),
            path = url.path(),
            attempt = self.reconnect.attempt(),
            "스트림 연결 중"
        );

        let connector = Arc::clone(&self.connector);
        let connect = connector.connect(url.as_str());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(socket) => self.run_session(socket).await,
                        Err(e) => {
                            warn!(error = %e, "스트림 연결 실패");
                            self.set_status(ConnectionStatus::Disconnected);
                            self.schedule_reconnect(e)
                        }
                    };
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Phase::Shutdown;
                    };
                    if let Flow::Disconnect = self.handle_command(command, None).await {
                        self.set_status(ConnectionStatus::Disconnected);
                        return Phase::Idle;
                    }
                }
            }
        }
    }

    async fn run_backoff(&mut self, until: Instant) -> Phase {
        let delay = sleep_until(until);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return Phase::Connecting,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Phase::Shutdown;
                    };
                    match self.handle_command(command, None).await {
                        Flow::Connect => return Phase::Connecting,
                        Flow::Disconnect => return Phase::Idle,
                        Flow::Continue | Flow::Failed(_) => {}
                    }
                }
            }
        }
    }

    async fn run_session(&mut self, mut socket: Socket) -> Phase {
        self.reconnect.reset();
        self.sessions_opened += 1;
        self.heartbeat.start(Instant::now());
        self.set_status(ConnectionStatus::Open);
        self.emit(ClientEvent::Connected);
        info!(
            channels = self.registry.channel_count(),
            pending = self.outbound.len(),
            "스트림 연결 성공"
        );

        let end = match self.open_session(&mut socket).await {
            Ok(()) => self.drive_session(&mut socket).await,
            Err(error) => SessionEnd::Dropped { code: None, error },
        };
        self.finish_session(end, socket).await
    }

    /// 구독을 복원하고 대기 중인 명령을 전송합니다.
    async fn open_session(&mut self, socket: &mut Socket) -> StreamResult<()> {
        let replay = self.registry.replay_messages();
        if !replay.is_empty() {
            info!(count = replay.len(), "구독 복원");
        }
        for message in replay {
            send_control(socket, &message, self.write_timeout).await?;
        }
        self.drain_outbound(socket).await
    }

    async fn drain_outbound(&mut self, socket: &mut Socket) -> StreamResult<()> {
        let mut delivered = 0usize;
        while let Some(command) = self.outbound.pop_front() {
            let result = bounded(self.write_timeout, outbound::deliver(&mut **socket, &command)).await;
            if let Err(e) = result {
                self.outbound.requeue_front(command);
                return Err(e);
            }
            delivered += 1;
        }
        if delivered > 0 {
            info!(delivered, "대기 중이던 송신 명령 전송 완료");
        }
        Ok(())
    }

    async fn drive_session(&mut self, socket: &mut Socket) -> SessionEnd {
        let mut burst = 0usize;
        loop {
            let pong_deadline = self.heartbeat.pong_deadline();
            let ping_at = self.heartbeat.next_ping_at();
            let flush_at = self.coalescer.flush_deadline();
            let frames_allowed = burst < MAX_FRAME_BURST;

            let event = tokio::select! {
                biased;
                frame = socket.next_frame(), if frames_allowed => SessionEvent::Frame(frame),
                command = self.commands.recv() => SessionEvent::Command(command),
                _ = sleep_until_opt(pong_deadline), if pong_deadline.is_some() => SessionEvent::PongTimeout,
                _ = sleep_until_opt(ping_at), if ping_at.is_some() => SessionEvent::PingDue,
                _ = sleep_until_opt(flush_at), if flush_at.is_some() => SessionEvent::Flush,
                _ = future::ready(()), if !frames_allowed => SessionEvent::Yield,
            };

            burst = match event {
                SessionEvent::Frame(_) => burst + 1,
                _ => 0,
            };

            match event {
                SessionEvent::Frame(Some(Ok(Frame::Text(text)))) => {
                    self.handle_text(&text);
                    if self.coalescer.is_due(Instant::now()) {
                        self.flush_coalesced();
                    }
                }
                SessionEvent::Frame(Some(Ok(Frame::Close(code)))) => {
                    return match code {
                        Some(NORMAL_CLOSURE) => SessionEnd::ServerClosed,
                        code => SessionEnd::Dropped {
                            code,
                            error: StreamError::Transport(format!(
                                "서버가 연결을 닫았습니다 (code: {:?})",
                                code
                            )),
                        },
                    };
                }
                SessionEvent::Frame(Some(Err(error))) => {
                    return SessionEnd::Dropped { code: None, error };
                }
                SessionEvent::Frame(None) => {
                    return SessionEnd::Dropped {
                        code: None,
                        error: StreamError::Transport("스트림이 종료되었습니다".to_string()),
                    };
                }
                SessionEvent::Command(None) => return SessionEnd::Shutdown,
                SessionEvent::Command(Some(command)) => {
                    match self.handle_command(command, Some(&mut *socket)).await {
                        Flow::Disconnect => return SessionEnd::Manual,
                        Flow::Failed(error) => return SessionEnd::Dropped { code: None, error },
                        Flow::Continue | Flow::Connect => {}
                    }
                }
                SessionEvent::PongTimeout => {
                    if self.heartbeat.on_timeout() {
                        let timeout = self.heartbeat.timeout();
                        warn!(?timeout, "pong 응답 없음 - 연결을 종료합니다");
                        let close = socket.close(HEARTBEAT_TIMEOUT_CLOSURE, "heartbeat timeout");
                        if let Err(e) = bounded(self.write_timeout, close).await {
                            debug!(error = %e, "소켓 종료 실패");
                        }
                        return SessionEnd::Dropped {
                            code: Some(HEARTBEAT_TIMEOUT_CLOSURE),
                            error: StreamError::HeartbeatTimeout(timeout),
                        };
                    }
                }
                SessionEvent::PingDue => {
                    if let Err(error) = send_control(socket, &ClientMessage::Ping, self.write_timeout).await {
                        return SessionEnd::Dropped { code: None, error };
                    }
                    self.heartbeat.on_ping_sent(Instant::now());
                    debug!("ping 전송");
                }
                SessionEvent::Flush => self.flush_coalesced(),
                SessionEvent::Yield => {}
            }
        }
    }

    async fn finish_session(&mut self, end: SessionEnd, mut socket: Socket) -> Phase {
        self.heartbeat.stop();
        let discarded = self.coalescer.cancel();
        if discarded > 0 {
            debug!(discarded, "전달되지 않은 병합 업데이트 폐기");
        }

        match end {
            SessionEnd::Manual => {
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ClientEvent::Disconnected {
                    code: Some(NORMAL_CLOSURE),
                    reason: "client disconnect".to_string(),
                });
                Phase::Idle
            }
            SessionEnd::ServerClosed => {
                info!("서버가 연결을 정상 종료했습니다");
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ClientEvent::Disconnected {
                    code: Some(NORMAL_CLOSURE),
                    reason: "server closed".to_string(),
                });
                Phase::Idle
            }
            SessionEnd::Dropped { code, error } => {
                warn!(?code, error = %error, "스트림 연결 끊김");
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ClientEvent::Disconnected {
                    code,
                    reason: error.to_string(),
                });
                self.schedule_reconnect(error)
            }
            SessionEnd::Shutdown => {
                self.set_status(ConnectionStatus::Closing);
                let close = socket.close(NORMAL_CLOSURE, "client dropped");
                if let Err(e) = bounded(self.write_timeout, close).await {
                    debug!(error = %e, "소켓 종료 실패");
                }
                self.set_status(ConnectionStatus::Disconnected);
                Phase::Shutdown
            }
        }
    }

    /// 다음 재연결을 예약합니다. 시도 횟수를 소진하면 종료 에러를 알리고 대기 상태로 돌아갑니다.
    fn schedule_reconnect(&mut self, error: StreamError) -> Phase {
        if self.manual_disconnect {
            return Phase::Idle;
        }
        self.emit(ClientEvent::Error {
            error: error.clone(),
            terminal: false,
        });

        match self.reconnect.next_attempt() {
            Some((attempt, delay)) => {
                warn!(
                    attempt,
                    max_attempts = self.reconnect.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "재연결 예약"
                );
                self.emit(ClientEvent::ReconnectScheduled { attempt, delay });
                Phase::Backoff(Instant::now() + delay)
            }
            None => {
                let attempts = self.reconnect.attempt();
                error!(attempts, "최대 재연결 시도 횟수 초과 - 재연결을 중단합니다");
                self.emit(ClientEvent::Error {
                    error: StreamError::Terminal { attempts },
                    terminal: true,
                });
                Phase::Idle
            }
        }
    }

    async fn handle_command(&mut self, command: ClientCommand, socket: Option<&mut Socket>) -> Flow {
        match command {
            ClientCommand::Connect { endpoint, token } => {
                let status = *self.status.borrow();
                if matches!(status, ConnectionStatus::Connecting | ConnectionStatus::Open) {
                    debug!(?status, "이미 연결 중이므로 connect 요청 무시");
                    return Flow::Continue;
                }
                self.target = Some(Target { endpoint, token });
                self.manual_disconnect = false;
                self.reconnect.reset();
                Flow::Connect
            }
            ClientCommand::Disconnect => {
                self.manual_disconnect = true;
                self.heartbeat.stop();
                self.coalescer.cancel();
                if let Some(socket) = socket {
                    self.set_status(ConnectionStatus::Closing);
                    let close = socket.close(NORMAL_CLOSURE, "client disconnect");
                    if let Err(e) = bounded(self.write_timeout, close).await {
                        debug!(error = %e, "소켓 종료 실패");
                    }
                }
                info!("스트림 연결 해제 요청");
                Flow::Disconnect
            }
            ClientCommand::Subscribe { key, listener } => {
                match self.registry.add(&key, listener) {
                    AddOutcome::FirstListener => match socket {
                        Some(socket) => {
                            let message = ChannelKey::parse(&key).subscribe_message();
                            if let Err(e) = send_control(socket, &message, self.write_timeout).await {
                                return Flow::Failed(e);
                            }
                            info!(key = %key, "채널 구독");
                        }
                        None => debug!(key = %key, "연결 후 구독 예정"),
                    },
                    AddOutcome::Added => debug!(key = %key, "기존 구독에 리스너 추가"),
                    AddOutcome::Duplicate => debug!(key = %key, "이미 등록된 리스너"),
                }
                Flow::Continue
            }
            ClientCommand::Unsubscribe { key, listener } => {
                match self.registry.remove(&key, &listener) {
                    RemoveOutcome::ChannelEmptied => {
                        if let Some(socket) = socket {
                            let message = ChannelKey::parse(&key).unsubscribe_message();
                            // 구독 해제 전송 실패는 무시
                            if let Err(e) = send_control(socket, &message, self.write_timeout).await {
                                debug!(key = %key, error = %e, "구독 해제 전송 실패");
                            }
                        }
                        info!(key = %key, "채널 구독 해제");
                    }
                    RemoveOutcome::Removed => debug!(key = %key, "리스너 제거"),
                    RemoveOutcome::NotFound => debug!(key = %key, "등록되지 않은 리스너"),
                }
                Flow::Continue
            }
            ClientCommand::Send(message) => match socket {
                Some(socket) => {
                    let command = PendingCommand::new(message);
                    let result = bounded(self.write_timeout, outbound::deliver(&mut **socket, &command)).await;
                    if let Err(e) = result {
                        self.outbound.requeue_front(command);
                        return Flow::Failed(e);
                    }
                    Flow::Continue
                }
                None => {
                    self.outbound.push(message);
                    debug!(pending = self.outbound.len(), "연결 전 송신 명령 보관");
                    Flow::Continue
                }
            },
            ClientCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
                Flow::Continue
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        self.frames_received += 1;
        match router::route(text) {
            Ok(Routed::Connected { session_id }) => {
                debug!(session_id = session_id.as_deref().unwrap_or("-"), "서버 연결 확인");
            }
            Ok(Routed::Subscribed { channels }) => debug!(?channels, "구독 확인"),
            Ok(Routed::Pong) => {
                if let Some(rtt) = self.heartbeat.on_pong(Instant::now()) {
                    debug!(rtt_ms = rtt.as_millis() as u64, "pong 수신");
                }
            }
            Ok(Routed::Data(event)) => {
                if self.coalescer.is_coalescable(event.kind) {
                    self.coalescer.push(event, Instant::now());
                } else {
                    self.registry.dispatch(&event);
                }
            }
            Ok(Routed::Unknown) => debug!("알 수 없는 메시지 타입 무시"),
            Err(e) => {
                self.protocol_errors += 1;
                warn!(error = %e, "수신 프레임 파싱 실패 - 무시합니다");
            }
        }
    }

    fn flush_coalesced(&mut self) {
        for event in self.coalescer.flush() {
            self.registry.dispatch(&event);
        }
    }

    fn stream_url(&self) -> StreamResult<Url> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| StreamError::InvalidEndpoint("연결 대상이 지정되지 않았습니다".to_string()))?;

        let mut channels: BTreeSet<String> = self.config.auto_channels.iter().cloned().collect();
        channels.extend(self.registry.plain_channels());
        build_stream_url(&target.endpoint, &target.token, &channels)
    }

    fn stats(&self) -> ClientStats {
        ClientStats {
            status: *self.status.borrow(),
            channels: self.registry.channel_count(),
            listeners: self.registry.total_listeners(),
            pending_outbound: self.outbound.len(),
            dropped_outbound: self.outbound.dropped(),
            pending_coalesced: self.coalescer.pending_len(),
            superseded_updates: self.coalescer.superseded(),
            frames_received: self.frames_received,
            protocol_errors: self.protocol_errors,
            reconnect_attempt: self.reconnect.attempt(),
            sessions_opened: self.sessions_opened,
            last_rtt: self.heartbeat.last_rtt(),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: ClientEvent) {
        // 구독자가 없으면 무시
        let _ = self.events.send(event);
    }
}

async fn send_control(socket: &mut Socket, message: &ClientMessage, limit: Duration) -> StreamResult<()> {
    let text = OutboundMessage::Control(message.clone()).to_json()?;
    bounded(limit, socket.send_text(text)).await
}

/// 소켓 쓰기를 `limit` 안에 끝내지 못하면 전송 에러로 처리합니다.
async fn bounded<T>(limit: Duration, io: impl Future<Output = StreamResult<T>>) -> StreamResult<T> {
    match tokio::time::timeout(limit, io).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::Transport(format!(
            "소켓 쓰기 시간 초과 ({}ms)",
            limit.as_millis()
        ))),
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> Sleep {
    sleep_until(deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE))
}

/// 연결 URL을 생성합니다.
///
/// `token`과 자동 구독 채널 목록(`channels`, 쉼표 구분)을 쿼리에 추가합니다.
pub(crate) fn build_stream_url(
    endpoint: &str,
    token: &str,
    channels: &BTreeSet<String>,
) -> StreamResult<Url> {
    let mut url = Url::parse(endpoint)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(StreamError::InvalidEndpoint(format!(
            "WebSocket 스킴이 아닙니다: {}",
            url.scheme()
        )));
    }

    {
        let mut query = url.query_pairs_mut();
        if !token.is_empty() {
            query.append_pair("token", token);
        }
        if !channels.is_empty() {
            let joined = channels.iter().map(String::as_str).collect::<Vec<_>>().join(",");
            query.append_pair("channels", &joined);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}
