//! 송신 대기열.
//!
//! 연결이 열려 있지 않은 동안 보낸 명령을 순서대로 보관했다가
//! 연결이 열리면 전송합니다. 용량을 넘으면 가장 오래된 명령을 폐기합니다.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StreamResult;
use crate::messages::OutboundMessage;
use crate::transport::TransportSocket;

/// 전송 대기 중인 명령.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub message: OutboundMessage,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingCommand {
    pub fn new(message: OutboundMessage) -> Self {
        Self {
            message,
            enqueued_at: Utc::now(),
        }
    }
}

/// 유한 FIFO 송신 대기열.
#[derive(Debug)]
pub struct OutboundQueue {
    queue: VecDeque<PendingCommand>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// 명령을 뒤에 추가합니다. 가득 차 있으면 가장 오래된 명령을 폐기하고 반환합니다.
    pub fn push(&mut self, message: OutboundMessage) -> Option<PendingCommand> {
        let evicted = if self.queue.len() >= self.capacity {
            self.dropped += 1;
            self.queue.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(
                capacity = self.capacity,
                enqueued_at = %old.enqueued_at,
                "송신 대기열 가득 참 - 가장 오래된 명령 폐기"
            );
        }
        self.queue.push_back(PendingCommand::new(message));
        evicted
    }

    /// 전송에 실패한 명령을 맨 앞으로 되돌립니다.
    pub fn requeue_front(&mut self, command: PendingCommand) {
        self.queue.push_front(command);
        if self.queue.len() > self.capacity {
            self.queue.pop_back();
            self.dropped += 1;
            warn!(capacity = self.capacity, "송신 대기열 가득 참 - 가장 최근 명령 폐기");
        }
    }

    pub fn pop_front(&mut self) -> Option<PendingCommand> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 용량 초과로 폐기된 누적 명령 수.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// 명령을 전송합니다. 실패 시 한 번 재시도합니다.
pub async fn deliver<S>(socket: &mut S, command: &PendingCommand) -> StreamResult<()>
where
    S: TransportSocket + ?Sized,
{
    let text = command.message.to_json()?;
    match socket.send_text(text.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "명령 전송 실패 - 재시도");
            socket.send_text(text).await
        }
    }
}
