use serde::{Deserialize, Serialize};

use crate::models::account::AccountRecord;
use crate::models::task::TaskInfo;

/// Everything a box pulls on sync. Replaces the box's projection wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncSnapshot {
    pub tasks: Vec<TaskInfo>,
    pub accounts: Vec<AccountRecord>,
}
