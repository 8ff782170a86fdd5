use thiserror::Error;

pub type Result<T> = std::result::Result<T, DseError>;

#[derive(Debug, Error)]
pub enum DseError {
    /// A plan line violates the phase grammar.
    #[error("malformed plan (line {line}): {reason}")]
    MalformedPlan { line: usize, reason: String },

    /// Degenerate or mismatched bounds reached the interpolator.
    #[error("invalid range for '{param}': {reason}")]
    InvalidRange { param: String, reason: String },

    #[error("invalid quantity '{0}': expected a magnitude followed by a unit suffix")]
    InvalidQuantity(String),

    /// The simulator produced no report, or too few numeric tokens.
    #[error("missing simulator statistics: {0}")]
    MissingStats(String),

    /// Logged, not returned: the step still reads whatever report was left.
    #[error("external tool '{tool}' failed: {status}")]
    ExternalToolFailure { tool: String, status: String },

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("experiment state not initialized at {0} (run `dse init`)")]
    NotInitialized(String),

    #[error("simulator runner failed: {0:#}")]
    Simulator(#[source] anyhow::Error),

    #[error("plan oracle failed: {0:#}")]
    Oracle(#[source] anyhow::Error),

    #[error("report generator failed: {0:#}")]
    Report(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DseError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        DseError::MalformedPlan {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_range(param: &str, reason: impl Into<String>) -> Self {
        DseError::InvalidRange {
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    /// `status` is `None` when the tool could not be started or was killed
    /// before exiting.
    pub(crate) fn tool_failure(tool: &str, status: Option<i32>) -> Self {
        DseError::ExternalToolFailure {
            tool: tool.to_string(),
            status: status
                .map(|c| format!("exit status {}", c))
                .unwrap_or_else(|| "did not run to completion".to_string()),
        }
    }

    /// Stable machine-readable code, used by the CLI's JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            DseError::MalformedPlan { .. } => "malformed_plan",
            DseError::InvalidRange { .. } => "invalid_range",
            DseError::InvalidQuantity(_) => "invalid_quantity",
            DseError::MissingStats(_) => "missing_stats",
            DseError::ExternalToolFailure { .. } => "external_tool_failure",
            DseError::UnknownParameter(_) => "unknown_parameter",
            DseError::NotInitialized(_) => "not_initialized",
            DseError::Simulator(_) => "simulator_failed",
            DseError::Oracle(_) => "oracle_failed",
            DseError::Report(_) => "report_failed",
            DseError::Config(_) => "invalid_config",
            DseError::Io(_) => "io_error",
            DseError::Json(_) => "state_encoding",
        }
    }
}
