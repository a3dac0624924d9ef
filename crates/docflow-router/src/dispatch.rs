//! Late-ack dispatch. A delivery stays in flight until the handler succeeds;
//! failures are redelivered with backoff and crashes are redelivered once
//! the visibility timeout lapses. Handlers must therefore be idempotent.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

use docflow_common::ExecutionContext;

use crate::TaskRouter;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub task: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    /// Deliveries of this message that ended in a handler error.
    #[serde(default)]
    pub failures: u32,
}

impl TaskMessage {
    pub fn new(task: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            payload,
            context: None,
            failures: 0,
        }
    }

    pub fn with_context(mut self, ctx: ExecutionContext) -> Self {
        self.context = Some(ctx);
        self
    }

    pub fn span(&self) -> tracing::Span {
        match &self.context {
            Some(ctx) => ctx.span("task"),
            None => tracing::info_span!("task", task = %self.task, message_id = %self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub message: TaskMessage,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue; the message becomes visible after `delay`.
    async fn publish(&self, queue: &str, message: TaskMessage, delay: Option<Duration>)
        -> Result<()>;
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>>;
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
    /// Hand the delivery back after a failed attempt. `None` dead-letters it.
    async fn nack(&self, delivery: &Delivery, requeue_after: Option<Duration>) -> Result<()>;
}

/// Route `message` and publish it. Returns the queue it went to.
pub async fn dispatch(
    router: &TaskRouter,
    broker: &dyn Broker,
    message: TaskMessage,
) -> Result<String> {
    let route = router.route(&message.task);
    let queue = route.queue.to_string();
    tracing::debug!(task = %message.task, queue = %queue, message_id = %message.id, "dispatching task");
    broker.publish(&queue, message, None).await?;
    Ok(queue)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing visible on the queue.
    Idle,
    Acked { message_id: String },
    Retried {
        message_id: String,
        attempt: u32,
        delay: Duration,
    },
    DeadLettered { message_id: String },
}

/// Take one delivery from `queue` and run `handler` on it. The delivery is
/// acked only after the handler returns `Ok`; otherwise it is redelivered
/// under the queue's retry policy until the budget runs out.
pub async fn process_next<F, Fut, E>(
    broker: &dyn Broker,
    router: &TaskRouter,
    queue: &str,
    handler: F,
) -> Result<ProcessOutcome>
where
    F: FnOnce(TaskMessage) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    let Some(delivery) = broker.receive(queue).await? else {
        return Ok(ProcessOutcome::Idle);
    };
    let span = delivery.message.span();
    let message_id = delivery.message.id.clone();

    let result = handler(delivery.message.clone())
        .instrument(span.clone())
        .await;

    match result {
        Ok(()) => {
            broker.ack(&delivery).await?;
            Ok(ProcessOutcome::Acked { message_id })
        }
        Err(e) => {
            let attempt = delivery.message.failures + 1;
            let policy = router.retry_policy_for_queue(queue);
            if policy.should_retry(attempt) {
                let delay = policy.jittered_delay(attempt);
                tracing::warn!(
                    parent: &span,
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "task failed, scheduling redelivery"
                );
                broker.nack(&delivery, Some(delay)).await?;
                Ok(ProcessOutcome::Retried {
                    message_id,
                    attempt,
                    delay,
                })
            } else {
                tracing::error!(parent: &span, error = %e, attempt, "task failed, retries exhausted");
                broker.nack(&delivery, None).await?;
                Ok(ProcessOutcome::DeadLettered { message_id })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory broker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Pending {
    message: TaskMessage,
    visible_at: Instant,
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    message: TaskMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Pending>>,
    in_flight: HashMap<u64, InFlight>,
    dead_letters: Vec<TaskMessage>,
    next_tag: u64,
}

/// Single-process broker for tests and local runs.
#[derive(Debug)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    visibility_timeout: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl MemoryBroker {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            visibility_timeout,
        }
    }

    /// Put deliveries whose worker never acked back on their queue, as if the
    /// worker had crashed. Their failure count is left alone.
    pub async fn requeue_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let expired: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in &expired {
            if let Some(f) = state.in_flight.remove(tag) {
                tracing::info!(queue = %f.queue, message_id = %f.message.id, "visibility timeout lapsed, redelivering");
                state.queues.entry(f.queue).or_default().push_front(Pending {
                    message: f.message,
                    visible_at: now,
                });
            }
        }
        expired.len()
    }

    pub async fn depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<TaskMessage> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(
        &self,
        queue: &str,
        message: TaskMessage,
        delay: Option<Duration>,
    ) -> Result<()> {
        let visible_at = Instant::now() + delay.unwrap_or_default();
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Pending {
                message,
                visible_at,
            });
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let now = Instant::now();
        self.requeue_expired_at(now).await;

        let mut state = self.state.lock().await;
        let Some(pending) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some(pos) = pending.iter().position(|p| p.visible_at <= now) else {
            return Ok(None);
        };
        let Some(Pending { message, .. }) = pending.remove(pos) else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        state.in_flight.insert(
            tag,
            InFlight {
                queue: queue.to_string(),
                message: message.clone(),
                deadline: now + self.visibility_timeout,
            },
        );
        Ok(Some(Delivery {
            tag,
            queue: queue.to_string(),
            message,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.state
            .lock()
            .await
            .in_flight
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(DispatchError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue_after: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut flight = state
            .in_flight
            .remove(&delivery.tag)
            .ok_or(DispatchError::UnknownDelivery(delivery.tag))?;
        flight.message.failures += 1;
        match requeue_after {
            Some(delay) => state.queues.entry(flight.queue).or_default().push_back(Pending {
                message: flight.message,
                visible_at: Instant::now() + delay,
            }),
            None => state.dead_letters.push(flight.message),
        }
        Ok(())
    }
}
