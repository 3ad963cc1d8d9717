// Progress rendering
// Prints execution events streamed from the engine while a run is in flight

use crate::output;

use sluice_engine::execution::{ExecutionEvent, LogLevel, NodeStatus, ProgressReceiver};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// Render events until every sender is dropped
pub async fn render(rx: ProgressReceiver) {
    let mut events = UnboundedReceiverStream::new(rx);

    while let Some(event) = events.next().await {
        match &event {
            ExecutionEvent::RunStarted {
                pipeline,
                mode,
                total_nodes,
            } => {
                println!();
                output::header(&format!(
                    "Pipeline '{}' [{}] ({} nodes)",
                    pipeline, mode, total_nodes
                ));
            }

            ExecutionEvent::RunCompleted {
                success, duration, ..
            } => {
                println!();
                if *success {
                    output::dim_success(&format!("  Run finished in {:.2}s", duration.as_secs_f64()));
                } else {
                    output::dim_failure(&format!("  Run stopped after {:.2}s", duration.as_secs_f64()));
                }
            }

            ExecutionEvent::LayerStarted { index, nodes } => {
                output::layer_header(*index, nodes);
            }

            ExecutionEvent::NodeStarted { node, .. } => {
                println!("    {}", node);
            }

            ExecutionEvent::NodeCompiled { artifacts, .. } => {
                if *artifacts > 1 {
                    output::dim(&format!("      {} variants", artifacts));
                }
            }

            ExecutionEvent::StatementExecuted {
                artifact,
                statement_index,
                rows,
                ..
            } => {
                let rows = rows.map(|n| format!(", {} rows", n)).unwrap_or_default();
                output::dim(&format!(
                    "      [{}] statement {}{}",
                    artifact,
                    statement_index + 1,
                    rows
                ));
            }

            ExecutionEvent::ArtifactPersisted { path, .. } => {
                output::dim(&format!("      -> {}", path.display()));
            }

            ExecutionEvent::OutputRecorded { output, values, .. } => {
                output::dim(&format!("      [out] {} ({} values)", output, values));
            }

            ExecutionEvent::NodeCompleted {
                node,
                status,
                duration,
                ..
            } => {
                let line = format!(
                    "    {} {} ({:.2}s)",
                    node,
                    status.as_str().to_uppercase(),
                    duration.as_secs_f64()
                );
                match status {
                    NodeStatus::Failed => output::dim_failure(&line),
                    NodeStatus::Recovered | NodeStatus::Skipped => output::warning(line.trim()),
                    _ => output::dim_success(&line),
                }
            }

            ExecutionEvent::NodeSkipped { node, reason, .. } => {
                output::warning(&format!("    {} skipped: {}", node, reason));
            }

            ExecutionEvent::NodeFailed { node, error, .. } => {
                output::failure(&format!("{}: {}", node, error));
            }

            ExecutionEvent::Log { level, message, node } => {
                let message = match node {
                    Some(node) => format!("[{}] {}", node, message),
                    None => message.clone(),
                };
                match level {
                    LogLevel::Error => output::error(&message),
                    LogLevel::Warning => output::warning(&message),
                    LogLevel::Info => output::info(&message),
                    LogLevel::Debug => output::dim(&message),
                }
            }
        }
    }
}
