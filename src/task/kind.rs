//! Task types and the routing of long-running tools onto them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of background work. Closed set of well-known kinds plus `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    GenerateTestCases,
    GenerateRtm,
    CoverageAnalysis,
    FileProcessing,
    Custom(String),
}

impl TaskType {
    /// Wire name of this task type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::GenerateTestCases => "generate_test_cases",
            Self::GenerateRtm => "generate_rtm",
            Self::CoverageAnalysis => "coverage_analysis",
            Self::FileProcessing => "file_processing",
            Self::Custom(name) => name,
        }
    }

    /// Task type a long-running tool should be filed under, if it is one.
    pub fn for_tool(tool_name: &str) -> Option<TaskType> {
        match tool_name {
            "generate_test_cases_from_rtm" => Some(Self::GenerateTestCases),
            "generate_rtm_from_requirements" => Some(Self::GenerateRtm),
            "generate_requirements_from_doc"
            | "requirement_info_from_description"
            | "change_requirement_info" => Some(Self::FileProcessing),
            _ => None,
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s {
            "generate_test_cases" => Self::GenerateTestCases,
            "generate_rtm" => Self::GenerateRtm,
            "coverage_analysis" => Self::CoverageAnalysis,
            "file_processing" => Self::FileProcessing,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<TaskType> for String {
    fn from(kind: TaskType) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a tool should be handed to the engine instead of run inline.
pub fn runs_in_background(tool_name: &str) -> bool {
    TaskType::for_tool(tool_name).is_some()
}

/// User-facing note telling the caller where to poll a freshly launched task.
pub fn launch_message(tool_name: &str, task_id: Uuid) -> String {
    format!(
        "Started background task for {tool_name}.\n\
         Task ID: `{task_id}`\n\n\
         You can check the progress using:\n\
         - `GET /api/tasks/{task_id}` - Get current status\n\
         - `GET /api/tasks` - List all your tasks\n\n\
         Processing continues while the task runs in the background."
    )
}
