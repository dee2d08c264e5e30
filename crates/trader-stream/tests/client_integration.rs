//! 인메모리 전송 계층을 사용한 StreamClient 통합 테스트.
//!
//! 모든 테스트는 정지된 시계로 실행되어 재연결 대기, 하트비트, 병합 타이머가
//! 결정적으로 진행됩니다.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::time::Instant;
use trader_stream::{listener, ChannelEvent, ClientEvent, ConnectionStatus, StreamError};

const ENDPOINT: &str = "ws://stream.test/ws";

fn recording_listener() -> (trader_stream::ListenerRef, Arc<Mutex<Vec<ChannelEvent>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let l = listener(move |event: &ChannelEvent| sink.lock().unwrap().push(event.clone()));
    (l, received)
}

fn counting_listener() -> (trader_stream::ListenerRef, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let l = listener(move |_: &ChannelEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (l, count)
}

/// 한 병합 주기 안의 가격 업데이트 10건은 마지막 값으로 한 번만 전달됩니다.
#[tokio::test(start_paused = true)]
async fn test_price_burst_is_coalesced() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (l, received) = recording_listener();
    client.subscribe("BTCUSD:prices", l);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    let server = connector.session(0);
    for price in 1..=10 {
        server.push(price_frame("BTCUSD", price));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = received.lock().unwrap().clone();
    assert_eq!(events.len(), 1, "병합된 업데이트는 한 번만 전달되어야 함");
    let tick = events[0].price_tick().expect("price payload");
    assert_eq!(tick.symbol, "BTCUSD");
    assert_eq!(tick.price, dec!(10));

    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.superseded_updates, 9);
    assert_eq!(stats.pending_coalesced, 0);
}

/// 같은 주기 안에서도 종목별로 각자의 최신 값이 전달됩니다.
#[tokio::test(start_paused = true)]
async fn test_coalescing_is_per_instrument() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (l, received) = recording_listener();
    client.subscribe("prices", l);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    let server = connector.session(0);
    server.push(price_frame("ETHUSD", 1));
    server.push(price_frame("BTCUSD", 1));
    server.push(price_frame("ETHUSD", 2));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = received.lock().unwrap().clone();
    let seen: Vec<(String, i64)> = events
        .iter()
        .map(|e| (e.symbol.clone().unwrap(), e.data["price"].as_i64().unwrap()))
        .collect();
    assert_eq!(
        seen,
        vec![("ETHUSD".to_string(), 2), ("BTCUSD".to_string(), 1)]
    );
}

/// 병합 대상이 아닌 메시지는 즉시, 도착 순서대로 전달됩니다.
#[tokio::test(start_paused = true)]
async fn test_trades_delivered_in_order() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (l, received) = recording_listener();
    client.subscribe("trades", l);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    let server = connector.session(0);
    for id in 0..5 {
        server.push(json!({
            "type": "trade_update",
            "symbol": "BTCUSD",
            "data": { "id": id, "price": 100 + id }
        }));
    }
    settle().await;

    let ids: Vec<i64> = received
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.data["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

/// 채널 리스너와 심볼 한정 리스너 모두 해당 이벤트를 받습니다.
#[tokio::test(start_paused = true)]
async fn test_generic_and_scoped_listeners() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (all, all_count) = counting_listener();
    let (btc, btc_count) = counting_listener();
    let (eth, eth_count) = counting_listener();
    client.subscribe("prices", all);
    client.subscribe("BTCUSD:prices", btc);
    client.subscribe("ETHUSD:prices", eth);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    // 축약 인코딩
    connector.session(0).push(json!({
        "type": "price_update",
        "data": { "s": "BTCUSD", "p": 50000, "c": 10, "cp": 0.02, "t": 1_700_000_000 }
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(all_count.load(Ordering::SeqCst), 1);
    assert_eq!(btc_count.load(Ordering::SeqCst), 1);
    assert_eq!(eth_count.load(Ordering::SeqCst), 0);
}

/// 같은 리스너를 두 번 구독해도 구독 명령과 전달은 한 번뿐입니다.
#[tokio::test(start_paused = true)]
async fn test_subscribe_is_idempotent() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    let (l, count) = counting_listener();
    client.subscribe("trades", l.clone());
    client.subscribe("trades", l.clone());
    client.stats().await.expect("client alive");

    assert_eq!(
        server.sent_of_type("subscribe"),
        vec![json!({"type": "subscribe", "channels": ["trades"]})]
    );

    server.push(json!({"type": "trade_update", "data": {"id": 1}}));
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    client.unsubscribe("trades", &l);
    client.unsubscribe("trades", &l);
    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.listeners, 0);
    assert_eq!(server.sent_of_type("unsubscribe").len(), 1);

    server.push(json!({"type": "trade_update", "data": {"id": 2}}));
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// 연결이 열릴 때마다 키별로 정확히 한 번 구독을 복원합니다.
#[tokio::test(start_paused = true)]
async fn test_subscriptions_replayed_after_reconnect() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (a, _) = counting_listener();
    let (b, _) = counting_listener();
    client.subscribe("prices", a.clone());
    client.subscribe("prices", b);
    client.subscribe("ETHUSD:trades", a);
    client.connect(ENDPOINT, "secret");
    wait_until(|| connector.session_count() == 1).await;

    let first = connector.session(0);
    assert!(first.url.contains("token=secret"));
    assert!(first.url.contains("channels=prices"));
    assert!(!first.url.contains("trades"));
    assert_eq!(first.sent_of_type("subscribe").len(), 2);

    first.close(1006);
    wait_until(|| connector.session_count() == 2).await;
    settle().await;

    let second = connector.session(1);
    let replayed = second.sent_of_type("subscribe");
    assert_eq!(replayed.len(), 2);
    assert!(replayed.contains(&json!({"type": "subscribe", "channels": ["prices"]})));
    assert!(replayed.contains(
        &json!({"type": "subscribe", "channels": ["trades"], "symbols": ["ETHUSD"]})
    ));
    // 이전 세션에는 추가 전송 없음
    assert_eq!(first.sent_of_type("subscribe").len(), 2);
}

/// 비정상 종료 시 기본 대기 시간 후 재연결을 예약합니다.
#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects_after_base_delay() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut events = client.events();
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    let closed_at = Instant::now();
    connector.session(0).close(1006);

    let disconnected = next_event(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    assert!(matches!(disconnected, ClientEvent::Disconnected { code: Some(1006), .. }));

    let scheduled =
        next_event(&mut events, |e| matches!(e, ClientEvent::ReconnectScheduled { .. })).await;
    assert_eq!(
        scheduled,
        ClientEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(100),
        }
    );

    wait_until(|| connector.session_count() == 2).await;
    assert!(closed_at.elapsed() >= Duration::from_millis(100));
    assert_eq!(client.status(), ConnectionStatus::Open);
}

/// 서버의 정상 종료는 재연결하지 않습니다.
#[tokio::test(start_paused = true)]
async fn test_normal_server_close_stays_disconnected() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    connector.session(0).close(1000);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

/// pong이 없으면 하트비트 종료 코드로 한 번 닫고 한 번 재연결합니다.
#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_forces_single_reconnect() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut events = client.events();
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(server.sent_of_type("ping").len(), 1);
    assert!(server.closed_with().is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.closed_with(), Some(4000));
    wait_until(|| connector.session_count() == 2).await;

    let mut scheduled = 0;
    let mut heartbeat_errors = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ClientEvent::ReconnectScheduled { .. } => scheduled += 1,
            ClientEvent::Error {
                error: StreamError::HeartbeatTimeout(_),
                terminal: false,
            } => heartbeat_errors += 1,
            _ => {}
        }
    }
    assert_eq!(scheduled, 1);
    assert_eq!(heartbeat_errors, 1);
}

/// 제때 도착한 pong은 연결을 유지하고 왕복 시간을 기록합니다.
#[tokio::test(start_paused = true)]
async fn test_pong_keeps_connection_alive() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    server.push(json!({"type": "pong", "timestamp": 1}));
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert!(server.closed_with().is_none());
    assert_eq!(connector.attempts(), 1);
    let stats = client.stats().await.expect("client alive");
    assert!(stats.last_rtt.is_some());
    assert_eq!(stats.status, ConnectionStatus::Open);
}

/// 수동 연결 해제는 정상 종료 코드로 닫고 모든 타이머를 취소합니다.
#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_all_timers() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut events = client.events();
    let (l, count) = counting_listener();
    client.subscribe("prices", l);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    server.push(price_frame("BTCUSD", 1));
    client.disconnect();

    let disconnected = next_event(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    assert_eq!(
        disconnected,
        ClientEvent::Disconnected {
            code: Some(1000),
            reason: "client disconnect".to_string(),
        }
    );

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0, "대기 중인 병합 업데이트는 폐기되어야 함");
    assert_eq!(server.closed_with(), Some(1000));
    assert!(server.sent_of_type("ping").is_empty());
    assert_eq!(connector.attempts(), 1);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

/// 연결 전에 보낸 명령은 구독 복원 뒤에 순서대로 전송됩니다.
#[tokio::test(start_paused = true)]
async fn test_outbound_queue_flushed_on_open() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (l, _) = counting_listener();
    client.subscribe("orders", l);
    client.send(json!({"type": "place_order", "id": 1}));
    client.send(json!({"type": "place_order", "id": 2}));

    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.pending_outbound, 2);

    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    client.send(json!({"type": "place_order", "id": 3}));
    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.pending_outbound, 0);

    let sent = connector.session(0).sent();
    assert_eq!(
        sent,
        vec![
            json!({"type": "subscribe", "channels": ["orders"]}),
            json!({"type": "place_order", "id": 1}),
            json!({"type": "place_order", "id": 2}),
            json!({"type": "place_order", "id": 3}),
        ]
    );
}

/// 최대 시도 횟수를 넘기면 재연결을 멈추고 종료 에러를 한 번 알립니다.
#[tokio::test(start_paused = true)]
async fn test_terminal_error_after_max_attempts() {
    let connector = MockConnector::new();
    let mut config = test_config();
    config.reconnect.max_attempts = 2;
    let client = client_with(config, &connector);
    let mut events = client.events();

    connector.fail_next(100);
    client.connect(ENDPOINT, "token");

    let first = next_event(&mut events, |e| matches!(e, ClientEvent::ReconnectScheduled { .. })).await;
    assert_eq!(
        first,
        ClientEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );
    let second = next_event(&mut events, |e| matches!(e, ClientEvent::ReconnectScheduled { .. })).await;
    assert_eq!(
        second,
        ClientEvent::ReconnectScheduled {
            attempt: 2,
            delay: Duration::from_millis(200)
        }
    );
    let terminal = next_event(&mut events, |e| matches!(e, ClientEvent::Error { terminal: true, .. })).await;
    assert_eq!(
        terminal,
        ClientEvent::Error {
            error: StreamError::Terminal { attempts: 2 },
            terminal: true,
        }
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 3);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    // 수동 connect는 시도 횟수를 초기화하고 즉시 연결
    connector.fail_next(0);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.reconnect_attempt, 0);
    assert_eq!(stats.status, ConnectionStatus::Open);
}

/// 대기 시간은 연속 실패마다 두 배가 되고 연결 성공 후 초기화됩니다.
#[tokio::test(start_paused = true)]
async fn test_backoff_grows_and_resets() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut events = client.events();

    connector.fail_next(2);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::ReconnectScheduled { delay, .. } = event {
            delays.push(delay);
        }
    }
    assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);

    connector.session(0).close(1011);
    let scheduled =
        next_event(&mut events, |e| matches!(e, ClientEvent::ReconnectScheduled { .. })).await;
    assert_eq!(
        scheduled,
        ClientEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );
}

/// 재연결 대기 중 수동 connect는 즉시 연결합니다.
#[tokio::test(start_paused = true)]
async fn test_connect_during_backoff_is_immediate() {
    let connector = MockConnector::new();
    let mut config = test_config();
    config.reconnect.base_delay_ms = 5_000;
    config.reconnect.max_delay_ms = 30_000;
    let client = client_with(config, &connector);

    connector.fail_next(1);
    let started = Instant::now();
    client.connect(ENDPOINT, "token");
    settle().await;
    assert_eq!(connector.attempts(), 1);

    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(connector.attempts(), 2);
}

/// 이미 연결된 상태의 connect는 무시됩니다.
#[tokio::test(start_paused = true)]
async fn test_connect_while_open_is_noop() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    client.connect(ENDPOINT, "token");
    client.stats().await.expect("client alive");
    assert_eq!(connector.attempts(), 1);
}

/// 잘못된 프레임은 집계 후 무시되며 연결은 유지됩니다.
#[tokio::test(start_paused = true)]
async fn test_malformed_frames_do_not_close_connection() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (l, received) = recording_listener();
    client.subscribe("trades", l);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    server.push_text("not json");
    server.push(json!({"data": {"id": 1}}));
    server.push(json!({"type": "announcement", "text": "maintenance"}));
    server.push(json!({"type": "trade_update", "data": {"id": 2}}));
    settle().await;

    assert_eq!(received.lock().unwrap().len(), 1);
    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.protocol_errors, 2);
    assert_eq!(stats.frames_received, 4);
    assert_eq!(stats.status, ConnectionStatus::Open);
    assert_eq!(connector.attempts(), 1);
}

/// 설정의 자동 구독 채널과 등록된 일반 채널이 연결 URL에 포함됩니다.
#[tokio::test(start_paused = true)]
async fn test_connect_url_channels() {
    let connector = MockConnector::new();
    let mut config = test_config();
    config.auto_channels = vec!["orders".to_string(), "prices".to_string()];
    let client = client_with(config, &connector);
    let (l, _) = counting_listener();
    client.subscribe("prices", l.clone());
    client.subscribe("BTCUSD:candles", l);
    client.connect(ENDPOINT, "tok");
    wait_until(|| connector.attempts() == 1).await;

    let url = url::Url::parse(&connector.attempted_urls()[0]).unwrap();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        pairs,
        vec![
            ("token".to_string(), "tok".to_string()),
            ("channels".to_string(), "orders,prices".to_string()),
        ]
    );
}

/// 사용할 수 없는 엔드포인트는 연결 시도 없이 종료 에러로 보고됩니다.
#[tokio::test(start_paused = true)]
async fn test_invalid_endpoint_is_terminal() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut events = client.events();
    client.connect("http://stream.test", "token");

    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Error { .. })).await;
    assert!(matches!(
        event,
        ClientEvent::Error {
            error: StreamError::InvalidEndpoint(_),
            terminal: true
        }
    ));
    assert_eq!(connector.attempts(), 0);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

/// 마지막 핸들을 drop하면 소켓을 정상 종료합니다.
#[tokio::test(start_paused = true)]
async fn test_drop_closes_socket() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    drop(client);
    wait_until(|| server.closed_with().is_some()).await;
    assert_eq!(server.closed_with(), Some(1000));
}

/// 독립된 클라이언트는 구독과 소켓을 공유하지 않습니다.
#[tokio::test(start_paused = true)]
async fn test_multiple_clients_are_independent() {
    let connector_a = MockConnector::new();
    let connector_b = MockConnector::new();
    let a = client_with(test_config(), &connector_a);
    let b = client_with(test_config(), &connector_b);
    let (la, count_a) = counting_listener();
    let (lb, count_b) = counting_listener();
    a.subscribe("trades", la);
    b.subscribe("candles", lb);
    a.connect(ENDPOINT, "a");
    b.connect(ENDPOINT, "b");
    wait_until(|| connector_a.session_count() == 1 && connector_b.session_count() == 1).await;

    connector_a
        .session(0)
        .push(json!({"type": "trade_update", "data": {"id": 1}}));
    settle().await;

    assert_eq!(count_a.load(Ordering::SeqCst), 1);
    assert_eq!(count_b.load(Ordering::SeqCst), 0);

    a.disconnect();
    a.stats().await.expect("client alive");
    assert_eq!(a.status(), ConnectionStatus::Disconnected);
    assert_eq!(b.status(), ConnectionStatus::Open);
}

/// pong의 부가 필드 형식과 관계없이 하트비트가 유지됩니다.
#[tokio::test(start_paused = true)]
async fn test_pong_with_string_timestamp_keeps_connection() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    server.push(json!({"type": "pong", "timestamp": "2024-01-01T00:00:00Z"}));
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert!(server.closed_with().is_none());
    assert_eq!(connector.attempts(), 1);
    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.protocol_errors, 0);
    assert!(stats.last_rtt.is_some());
}

/// 쓰기가 멈춘 소켓은 쓰기 한도 후 끊긴 것으로 처리되고, 명령은 새 세션에서 전송됩니다.
#[tokio::test(start_paused = true)]
async fn test_stalled_write_drops_session() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut events = client.events();
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    let stalled_at = Instant::now();
    connector.session(0).stall_writes();
    client.send(json!({"type": "place_order", "id": 1}));

    let disconnected = next_event(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    assert!(matches!(disconnected, ClientEvent::Disconnected { code: None, .. }));
    assert!(stalled_at.elapsed() >= Duration::from_secs(10));

    wait_until(|| connector.session_count() == 2).await;
    let second = connector.session(1);
    wait_until(|| second.sent_of_type("place_order").len() == 1).await;
    assert_eq!(client.status(), ConnectionStatus::Open);
}

/// ping 전송이 멈춰도 disconnect와 통계 요청은 쓰기 한도 안에 처리됩니다.
#[tokio::test(start_paused = true)]
async fn test_disconnect_answered_while_ping_stalled() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;

    connector.session(0).stall_writes();
    tokio::time::sleep(Duration::from_secs(31)).await;
    client.disconnect();

    let stats = tokio::time::timeout(Duration::from_secs(60), client.stats())
        .await
        .expect("stats answered within write timeout")
        .expect("client alive");
    assert_eq!(stats.status, ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

/// 리스너가 패닉해도 연결 태스크는 계속 동작합니다.
#[tokio::test(start_paused = true)]
async fn test_panicking_listener_keeps_client_alive() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let (l, received) = recording_listener();
    client.subscribe("trades", listener(|_: &ChannelEvent| panic!("broken listener")));
    client.subscribe("candles", l);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    server.push(json!({"type": "trade_update", "data": {"id": 1}}));
    server.push(json!({"type": "candle_update", "data": {"open": 1}}));
    settle().await;

    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.status, ConnectionStatus::Open);
    assert_eq!(stats.frames_received, 2);
    assert_eq!(received.lock().unwrap().len(), 1);
    assert_eq!(connector.attempts(), 1);
}

/// 프레임이 계속 밀려 있어도 명령은 일정 개수의 프레임 뒤에 처리됩니다.
#[tokio::test(start_paused = true)]
async fn test_frame_backlog_yields_to_commands() {
    let connector = MockConnector::new();
    let client = client_with(test_config(), &connector);
    client.connect(ENDPOINT, "token");
    wait_until(|| connector.session_count() == 1).await;
    let server = connector.session(0);

    for id in 0..500 {
        server.push(json!({"type": "trade_update", "data": {"id": id}}));
    }
    client.disconnect();

    let stats = client.stats().await.expect("client alive");
    assert_eq!(stats.status, ConnectionStatus::Disconnected);
    assert!(stats.frames_received > 0);
    assert!(stats.frames_received < 500, "frames_received = {}", stats.frames_received);
    assert_eq!(server.closed_with(), Some(1000));
}
