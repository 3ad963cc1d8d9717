// Execution Events
// Progress reporting and event types for compile and execute runs

use crate::dag::ModeKind;

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// How a node finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Rendered only
    Compiled,
    /// Rendered and run against the executor
    Executed,
    /// Render failed and the fallback statement was used
    Recovered,
    /// Render failed and the node was left out
    Skipped,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Compiled => "compiled",
            NodeStatus::Executed => "executed",
            NodeStatus::Recovered => "recovered",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Failed => "failed",
        }
    }
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted {
        pipeline: String,
        mode: ModeKind,
        total_nodes: usize,
    },

    /// Run finished, successfully or not
    RunCompleted {
        pipeline: String,
        mode: ModeKind,
        success: bool,
        duration: Duration,
    },

    /// A group of mutually independent nodes is about to start
    LayerStarted { index: usize, nodes: Vec<String> },

    NodeStarted { node: String, mode: ModeKind },

    /// Templates rendered
    NodeCompiled {
        node: String,
        mode: ModeKind,
        artifacts: usize,
    },

    /// One statement of a node finished
    StatementExecuted {
        node: String,
        artifact: String,
        statement_index: usize,
        rows: Option<usize>,
    },

    /// A result or compiled artifact was written to disk
    ArtifactPersisted {
        node: String,
        artifact: String,
        path: PathBuf,
    },

    /// An output column was published to the execution context
    OutputRecorded {
        node: String,
        output: String,
        values: usize,
    },

    NodeCompleted {
        node: String,
        mode: ModeKind,
        status: NodeStatus,
        duration: Duration,
    },

    /// Node left out of the run
    NodeSkipped {
        node: String,
        mode: ModeKind,
        reason: String,
    },

    NodeFailed {
        node: String,
        mode: ModeKind,
        error: String,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        node: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a run started event
    pub fn run_started(pipeline: impl Into<String>, mode: ModeKind, total_nodes: usize) -> Self {
        Self::RunStarted {
            pipeline: pipeline.into(),
            mode,
            total_nodes,
        }
    }

    /// Create a run completed event
    pub fn run_completed(
        pipeline: impl Into<String>,
        mode: ModeKind,
        success: bool,
        duration: Duration,
    ) -> Self {
        Self::RunCompleted {
            pipeline: pipeline.into(),
            mode,
            success,
            duration,
        }
    }

    pub fn node_started(node: impl Into<String>, mode: ModeKind) -> Self {
        Self::NodeStarted {
            node: node.into(),
            mode,
        }
    }

    pub fn node_completed(
        node: impl Into<String>,
        mode: ModeKind,
        status: NodeStatus,
        duration: Duration,
    ) -> Self {
        Self::NodeCompleted {
            node: node.into(),
            mode,
            status,
            duration,
        }
    }

    pub fn node_skipped(node: impl Into<String>, mode: ModeKind, reason: impl Into<String>) -> Self {
        Self::NodeSkipped {
            node: node.into(),
            mode,
            reason: reason.into(),
        }
    }

    pub fn node_failed(node: impl Into<String>, mode: ModeKind, error: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: node.into(),
            mode,
            error: error.into(),
        }
    }

    /// Create an artifact persisted event
    pub fn artifact_persisted(
        node: impl Into<String>,
        artifact: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::ArtifactPersisted {
            node: node.into(),
            artifact: artifact.into(),
            path: path.into(),
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, node: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            node,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, node: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            node,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, node: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            node,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started("sales", ModeKind::Run, 2));
        tx.send_event(ExecutionEvent::node_started("orders", ModeKind::Run));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { total_nodes: 2, .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::NodeStarted { .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::node_completed(
            "orders",
            ModeKind::Save,
            NodeStatus::Recovered,
            Duration::from_millis(40),
        );

        if let ExecutionEvent::NodeCompleted {
            node,
            mode,
            status,
            duration,
        } = event
        {
            assert_eq!(node, "orders");
            assert_eq!(mode, ModeKind::Save);
            assert_eq!(status, NodeStatus::Recovered);
            assert_eq!(duration, Duration::from_millis(40));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::info("test", None));
    }
}
