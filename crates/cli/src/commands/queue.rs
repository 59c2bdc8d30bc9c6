use prsync_db::queue::{state_counts, QueueState};

use crate::commands::{with_database, CommandResult, StepError};

const STATES: [QueueState; 5] = [
    QueueState::Queued,
    QueueState::Processing,
    QueueState::Processed,
    QueueState::Failed,
    QueueState::Abandoned,
];

/// Reports how many jobs sit in each queue state.
pub fn status() -> CommandResult {
    with_database("queue status", |pool| async move {
        let counts = state_counts(&pool).await.map_err(StepError::persistence)?;
        let summary: Vec<String> = STATES
            .iter()
            .map(|state| {
                format!("{}={}", state.as_str(), counts.get(state.as_str()).copied().unwrap_or(0))
            })
            .collect();
        Ok(summary.join(" "))
    })
}
