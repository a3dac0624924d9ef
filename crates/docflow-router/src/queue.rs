use std::fmt;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Worker pool a task runs in. Each class gets its own queue so one kind of
/// work cannot starve another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    /// Everything without a dedicated queue, and all tasks while routing is off.
    Default,
    Scheduler,
    Notifications,
    FileProcessing,
    /// Cross-file completion callbacks. Kept apart from file processing so a
    /// burst of files cannot delay slot release.
    FileProcessingCallback,
    ApiDeployments,
}

impl QueueClass {
    pub const ALL: [QueueClass; 6] = [
        Self::Default,
        Self::Scheduler,
        Self::Notifications,
        Self::FileProcessing,
        Self::FileProcessingCallback,
        Self::ApiDeployments,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Scheduler => "scheduler",
            Self::Notifications => "notifications",
            Self::FileProcessing => "file_processing",
            Self::FileProcessingCallback => "file_processing_callback",
            Self::ApiDeployments => "api_deployments",
        }
    }

    /// Environment variable overriding the queue name.
    pub const fn env_key(self) -> &'static str {
        match self {
            Self::Default => "DOCFLOW_QUEUE_DEFAULT",
            Self::Scheduler => "DOCFLOW_QUEUE_SCHEDULER",
            Self::Notifications => "DOCFLOW_QUEUE_NOTIFICATIONS",
            Self::FileProcessing => "DOCFLOW_QUEUE_FILE_PROCESSING",
            Self::FileProcessingCallback => "DOCFLOW_QUEUE_FILE_PROCESSING_CALLBACK",
            Self::ApiDeployments => "DOCFLOW_QUEUE_API_DEPLOYMENTS",
        }
    }

    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::Default => RetryPolicy::new(3, 5, 60, true),
            Self::Scheduler => RetryPolicy::new(3, 10, 120, true),
            // webhook receivers are often flaky, back off longer
            Self::Notifications => RetryPolicy::new(5, 10, 600, true),
            Self::FileProcessing => RetryPolicy::new(3, 2, 60, true),
            Self::FileProcessingCallback => RetryPolicy::new(5, 1, 30, false),
            Self::ApiDeployments => RetryPolicy::new(3, 5, 120, false),
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task names with a dedicated queue. Anything else goes to
/// [`QueueClass::Default`].
pub const TASK_ROUTES: &[(&str, QueueClass)] = &[
    ("trigger_scheduled_workflow", QueueClass::Scheduler),
    ("send_webhook_notification", QueueClass::Notifications),
    ("process_file_batch", QueueClass::FileProcessing),
    ("process_batch_callback", QueueClass::FileProcessingCallback),
    ("deploy_api", QueueClass::ApiDeployments),
    ("undeploy_api", QueueClass::ApiDeployments),
];

pub fn classify(task: &str) -> QueueClass {
    TASK_ROUTES
        .iter()
        .find(|(name, _)| *name == task)
        .map(|(_, class)| *class)
        .unwrap_or(QueueClass::Default)
}

pub fn parse_queue_class(name: &str) -> Result<QueueClass, String> {
    QueueClass::ALL
        .into_iter()
        .find(|c| c.as_str() == name)
        .ok_or_else(|| {
            let available: Vec<&str> = QueueClass::ALL.iter().map(|c| c.as_str()).collect();
            format!(
                "unknown queue class '{}', available: {}",
                name,
                available.join(", ")
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_routes() {
        assert_eq!(classify("trigger_scheduled_workflow"), QueueClass::Scheduler);
        assert_eq!(classify("send_webhook_notification"), QueueClass::Notifications);
        assert_eq!(classify("process_file_batch"), QueueClass::FileProcessing);
        assert_eq!(
            classify("process_batch_callback"),
            QueueClass::FileProcessingCallback
        );
        assert_eq!(classify("deploy_api"), QueueClass::ApiDeployments);
        assert_eq!(classify("undeploy_api"), QueueClass::ApiDeployments);
        assert_eq!(classify("something_new"), QueueClass::Default);
    }

    #[test]
    fn env_keys_are_distinct() {
        let mut keys: Vec<_> = QueueClass::ALL.iter().map(|c| c.env_key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), QueueClass::ALL.len());
    }

    #[test]
    fn parse_known_and_unknown() {
        assert_eq!(parse_queue_class("scheduler"), Ok(QueueClass::Scheduler));
        let err = parse_queue_class("bulk").unwrap_err();
        assert!(err.contains("file_processing_callback"));
    }
}
