//! 통합 테스트용 인메모리 전송 계층.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use trader_core::StreamConfig;
use trader_stream::{
    ClientEvent, Connector, Frame, StreamClient, StreamError, StreamResult, TransportSocket,
};

/// 수락된 연결 하나의 서버 측.
#[derive(Clone)]
pub struct MockSession {
    pub url: String,
    to_client: mpsc::UnboundedSender<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<u16>>>,
    stalled: Arc<AtomicBool>,
}

impl MockSession {
    /// 클라이언트로 텍스트 프레임을 보냅니다.
    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    /// 클라이언트로 JSON 프레임을 보냅니다.
    pub fn push(&self, value: Value) {
        self.push_text(&value.to_string());
    }

    /// 서버 측에서 연결을 닫습니다.
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Frame::Close(Some(code)));
    }

    /// 클라이언트가 보낸 모든 프레임 (JSON).
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).expect("client sent invalid JSON"))
            .collect()
    }

    /// 지정한 `type`으로 클라이언트가 보낸 프레임.
    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|value| value["type"] == kind)
            .collect()
    }

    /// 클라이언트가 소켓을 닫을 때 사용한 종료 코드.
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed.lock().unwrap()
    }

    /// 이후 클라이언트의 쓰기가 완료되지 않도록 합니다 (송신 버퍼가 가득 찬 죽은 링크).
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

struct MockSocket {
    from_server: mpsc::UnboundedReceiver<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<u16>>>,
    stalled: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSocket for MockSocket {
    async fn send_text(&mut self, text: String) -> StreamResult<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.lock().unwrap().is_some() {
            return Err(StreamError::Transport("socket closed".into()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<StreamResult<Frame>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> StreamResult<()> {
        *self.closed.lock().unwrap() = Some(code);
        Ok(())
    }
}

/// 연결 시도를 기록하고 인메모리 소켓을 반환하는 커넥터.
#[derive(Default)]
pub struct MockConnector {
    attempts: Mutex<Vec<String>>,
    sessions: Mutex<Vec<MockSession>>,
    failures: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 다음 `n`번의 연결 시도를 실패시킵니다.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempted_urls(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> MockSession {
        self.sessions.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> StreamResult<Box<dyn TransportSocket>> {
        self.attempts.lock().unwrap().push(url.to_string());

        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StreamError::Transport("connection refused".into()));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(None));
        let stalled = Arc::new(AtomicBool::new(false));
        self.sessions.lock().unwrap().push(MockSession {
            url: url.to_string(),
            to_client,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            stalled: Arc::clone(&stalled),
        });

        Ok(Box::new(MockSocket {
            from_server,
            sent,
            closed,
            stalled,
        }))
    }
}

/// 빠른 재연결과 기본 16ms 병합 주기를 사용하는 설정.
pub fn test_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.reconnect.base_delay_ms = 100;
    config.reconnect.max_delay_ms = 1_000;
    config.reconnect.max_attempts = 5;
    config
}

pub fn client_with(config: StreamConfig, connector: &Arc<MockConnector>) -> StreamClient {
    StreamClient::with_connector(config, connector.clone())
}

/// `condition`이 참이 될 때까지 (정지된) 시간을 조금씩 진행합니다.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("가상 시간 10초 안에 조건을 만족하지 못했습니다");
}

/// 이미 대기 중인 작업을 클라이언트 태스크가 처리하도록 양보합니다.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// `predicate`와 일치하는 다음 이벤트를 기다립니다.
pub async fn next_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut predicate: impl FnMut(&ClientEvent) -> bool,
) -> ClientEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), wait)
        .await
        .expect("timed out waiting for client event")
}

pub fn price_frame(symbol: &str, price: i64) -> Value {
    serde_json::json!({
        "type": "price_update",
        "data": { "symbol": symbol, "price": price, "change": 0, "changePercent": 0 }
    })
}
