use std::collections::HashMap;

pub mod dispatch;
pub mod queue;
pub mod retry;

pub use dispatch::{
    dispatch, process_next, Broker, Delivery, DispatchError, MemoryBroker, ProcessOutcome,
    TaskMessage,
};
pub use queue::{classify, parse_queue_class, QueueClass, TASK_ROUTES};
pub use retry::RetryPolicy;

const ROUTING_ENABLED_ENV: &str = "DOCFLOW_TASK_ROUTING_ENABLED";

/// Queue layout resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// When off every task lands on the default queue, matching deployments
    /// that run a single worker pool.
    pub enabled: bool,
    queue_names: HashMap<QueueClass, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_names: QueueClass::ALL
                .iter()
                .map(|c| (*c, c.as_str().to_string()))
                .collect(),
        }
    }
}

impl RoutingConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ROUTING_ENABLED_ENV)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let queue_names = QueueClass::ALL
            .iter()
            .map(|c| {
                let name = lookup(c.env_key())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| c.as_str().to_string());
                (*c, name)
            })
            .collect();
        Self {
            enabled,
            queue_names,
        }
    }

    pub fn with_queue_name(mut self, class: QueueClass, name: impl Into<String>) -> Self {
        self.queue_names.insert(class, name.into());
        self
    }

    pub fn queue_name(&self, class: QueueClass) -> &str {
        self.queue_names
            .get(&class)
            .map(String::as_str)
            .unwrap_or(class.as_str())
    }
}

/// Where a task goes and how it is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub task: &'a str,
    pub class: QueueClass,
    pub queue: &'a str,
    pub retry: RetryPolicy,
}

pub struct TaskRouter {
    config: RoutingConfig,
}

impl TaskRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn route<'a>(&'a self, task: &'a str) -> Route<'a> {
        let class = if self.config.enabled {
            classify(task)
        } else {
            QueueClass::Default
        };
        Route {
            task,
            class,
            queue: self.config.queue_name(class),
            retry: class.retry_policy(),
        }
    }

    /// Retry policy for whatever queue a delivery came from.
    pub fn retry_policy_for_queue(&self, queue: &str) -> RetryPolicy {
        QueueClass::ALL
            .into_iter()
            .find(|c| self.config.queue_name(*c) == queue)
            .unwrap_or(QueueClass::Default)
            .retry_policy()
    }

    /// Distinct queue names workers need to consume.
    pub fn queues(&self) -> Vec<&str> {
        if !self.config.enabled {
            return vec![self.config.queue_name(QueueClass::Default)];
        }
        let mut names: Vec<&str> = QueueClass::ALL
            .iter()
            .map(|c| self.config.queue_name(*c))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
