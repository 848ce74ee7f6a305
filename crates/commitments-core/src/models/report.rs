use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Commitment, Task};

/// Body for `POST /users/report`
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReportRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "startDate")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub start_date: DateTime<Utc>,
    #[serde(rename = "endDate")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub end_date: DateTime<Utc>,
}

/// Work completed by a user within a report window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Report {
    #[serde(rename = "completedCommitments", default)]
    pub completed_commitments: Vec<Commitment>,
    #[serde(rename = "completedTasks", default)]
    pub completed_tasks: Vec<Task>,
}

impl Report {
    pub fn summary(&self) -> String {
        format!(
            "{} commitments, {} tasks completed",
            self.completed_commitments.len(),
            self.completed_tasks.len()
        )
    }
}
