//! Fixtures shared by the integration tests

use fieldbox_sync::models::task::{ScenarioKind, TaskInfo};
use serde_json::json;

pub const BOX_ID: &str = "box-7";

/// Body of a registration request for `id`.
pub fn registration_body(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Field savings",
        "account_type": "mobile_money",
        "meta": { "msisdn": "+250700000000" }
    })
}

pub fn sample_tasks() -> Vec<TaskInfo> {
    vec![
        TaskInfo {
            task_id: "task-speech".to_string(),
            task_name: "Read sentences aloud".to_string(),
            scenario_kind: ScenarioKind::SpeechData,
            credits_earned: 1.5,
        },
        TaskInfo {
            task_id: "task-verify".to_string(),
            task_name: "Check recordings".to_string(),
            scenario_kind: ScenarioKind::SpeechVerification,
            credits_earned: 0.25,
        },
        TaskInfo {
            task_id: "task-legacy".to_string(),
            task_name: "Old flow".to_string(),
            scenario_kind: ScenarioKind::from("IMAGE_LABELING"),
            credits_earned: 0.0,
        },
    ]
}
