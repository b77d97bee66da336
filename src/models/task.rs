use serde::{Deserialize, Serialize};
use std::fmt;

/// Which task-execution flow a task belongs to.
///
/// Tags the server does not know about are kept as `Unsupported` so that
/// dispatch over scenarios stays total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScenarioKind {
    SpeechData,
    SpeechVerification,
    TextTranslation,
    Unsupported(String),
}

impl ScenarioKind {
    pub fn as_str(&self) -> &str {
        match self {
            ScenarioKind::SpeechData => "SPEECH_DATA",
            ScenarioKind::SpeechVerification => "SPEECH_VERIFICATION",
            ScenarioKind::TextTranslation => "TEXT_TRANSLATION",
            ScenarioKind::Unsupported(tag) => tag,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ScenarioKind::Unsupported(_))
    }
}

impl From<&str> for ScenarioKind {
    fn from(tag: &str) -> Self {
        match tag {
            "SPEECH_DATA" => ScenarioKind::SpeechData,
            "SPEECH_VERIFICATION" => ScenarioKind::SpeechVerification,
            "TEXT_TRANSLATION" => ScenarioKind::TextTranslation,
            other => ScenarioKind::Unsupported(other.to_string()),
        }
    }
}

impl From<String> for ScenarioKind {
    fn from(tag: String) -> Self {
        ScenarioKind::from(tag.as_str())
    }
}

impl From<ScenarioKind> for String {
    fn from(kind: ScenarioKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only task projection handed to a box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    pub task_id: String,
    pub task_name: String,
    pub scenario_kind: ScenarioKind,
    pub credits_earned: f64,
}
