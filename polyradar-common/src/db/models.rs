//! Database models
//!
//! Status enums persist as their lowercase (outcomes: uppercase) serde names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Overall analysis status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisStatus::Processing)
    }
}

/// Status of one asynchronously produced result (prediction, timeline, ...)
///
/// Results only move forward: `pending → processing → {success|error|timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Processing,
    Success,
    Error,
    Timeout,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Processing => "processing",
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
            ResultStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Position in the forward-only lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            ResultStatus::Pending => 0,
            ResultStatus::Processing => 1,
            ResultStatus::Success | ResultStatus::Error | ResultStatus::Timeout => 2,
        }
    }

    /// Whether a write of `next` over `self` is allowed
    ///
    /// Same-rank writes are accepted so that a redelivered terminal result
    /// replaces the previous one.
    pub fn can_advance_to(&self, next: ResultStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// Predicted market outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
    Uncertain,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
            Outcome::Uncertain => "UNCERTAIN",
        }
    }
}

/// Token ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Spend,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Spend => "spend",
            TransactionKind::Refund => "refund",
        }
    }
}

macro_rules! impl_str_enum {
    ($ty:ty, $label:literal, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v: &$ty| v.as_str() == s)
                    .ok_or_else(|| Error::Internal(format!("Unknown {} '{}'", $label, s)))
            }
        }
    };
}

impl_str_enum!(AnalysisStatus, "analysis status", [
    AnalysisStatus::Processing,
    AnalysisStatus::Completed,
    AnalysisStatus::Failed,
]);
impl_str_enum!(ResultStatus, "result status", [
    ResultStatus::Pending,
    ResultStatus::Processing,
    ResultStatus::Success,
    ResultStatus::Error,
    ResultStatus::Timeout,
]);
impl_str_enum!(Outcome, "outcome", [Outcome::Yes, Outcome::No, Outcome::Uncertain]);
impl_str_enum!(TransactionKind, "transaction type", [
    TransactionKind::Purchase,
    TransactionKind::Spend,
    TransactionKind::Refund,
]);

/// Which kind of child result a row holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Prediction,
    Timeline,
    Insights,
    Sources,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Prediction => "prediction",
            ResultKind::Timeline => "timeline",
            ResultKind::Insights => "insights",
            ResultKind::Sources => "sources",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub wallet_address: String,
    pub radar_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: i64,
    pub description: Option<String>,
    pub analysis_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_url: String,
    pub event_title: Option<String>,
    pub status: AnalysisStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub model_name: String,
    pub status: ResultStatus,
    pub outcome: Option<Outcome>,
    pub confidence_percent: Option<f64>,
    pub reasoning: Option<String>,
    pub sources_count: Option<i64>,
    pub error: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementLevel {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

/// One dated entry on an event timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub status: ResultStatus,
    pub events: Vec<TimelineEvent>,
    pub error: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub outcome: Outcome,
    pub confidence_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_level: Option<AgreementLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Level>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Level>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TrendDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub status: ResultStatus,
    pub consensus: Option<Consensus>,
    pub risks: Vec<Risk>,
    pub opportunities: Vec<Opportunity>,
    pub trends: Vec<Trend>,
    /// Free-form insights text when the scenario does not return structured fields
    pub content: Option<String>,
    pub error: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sources {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub status: ResultStatus,
    pub links: Vec<String>,
    pub raw_response: Option<serde_json::Value>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Callback data for a model prediction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionUpdate {
    pub outcome: Option<Outcome>,
    pub confidence_percent: Option<f64>,
    pub reasoning: Option<String>,
    pub sources_count: Option<i64>,
    pub error: Option<String>,
    pub raw_response: Option<serde_json::Value>,
}

/// Callback data for a timeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineUpdate {
    pub events: Option<Vec<TimelineEvent>>,
    pub error: Option<String>,
    pub raw_response: Option<serde_json::Value>,
}

/// Callback data for insights
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsUpdate {
    pub consensus: Option<Consensus>,
    pub risks: Option<Vec<Risk>>,
    pub opportunities: Option<Vec<Opportunity>>,
    pub trends: Option<Vec<Trend>>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub raw_response: Option<serde_json::Value>,
}

/// Summary of how far an analysis has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    /// Results the analysis waits for (predictions + timeline + insights)
    pub expected: usize,
    /// Results in a terminal state
    pub finished: usize,
    /// Results that succeeded
    pub succeeded: usize,
    /// At least one result succeeded
    pub first_result_ready: bool,
    /// Analysis terminal and every expected result terminal
    pub settled: bool,
}

/// Joined read model of one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisView {
    pub analysis: Analysis,
    pub predictions: Vec<ModelPrediction>,
    pub timeline: Option<Timeline>,
    pub insights: Option<Insights>,
    pub sources: Option<Sources>,
    pub progress: AnalysisProgress,
}

impl AnalysisView {
    pub fn new(
        analysis: Analysis,
        predictions: Vec<ModelPrediction>,
        timeline: Option<Timeline>,
        insights: Option<Insights>,
        sources: Option<Sources>,
    ) -> Self {
        let mut view = Self {
            analysis,
            predictions,
            timeline,
            insights,
            sources,
            progress: AnalysisProgress {
                expected: 0,
                finished: 0,
                succeeded: 0,
                first_result_ready: false,
                settled: false,
            },
        };
        view.progress = view.compute_progress();
        view
    }

    /// Statuses of every result that gates completion (sources excluded)
    pub fn gating_statuses(&self) -> Vec<ResultStatus> {
        self.predictions
            .iter()
            .map(|p| p.status)
            .chain(self.timeline.iter().map(|t| t.status))
            .chain(self.insights.iter().map(|i| i.status))
            .collect()
    }

    fn compute_progress(&self) -> AnalysisProgress {
        let statuses = self.gating_statuses();
        let finished = statuses.iter().filter(|s| s.is_terminal()).count();
        let succeeded = statuses
            .iter()
            .filter(|s| **s == ResultStatus::Success)
            .count();

        AnalysisProgress {
            expected: statuses.len(),
            finished,
            succeeded,
            first_result_ready: succeeded > 0,
            settled: self.analysis.status.is_terminal() && finished == statuses.len(),
        }
    }
}

/// Status an analysis should take given its gating results
///
/// Returns `None` while any result is still pending or processing (or when
/// there are no results at all).
pub fn derive_analysis_status(statuses: &[ResultStatus]) -> Option<AnalysisStatus> {
    if statuses.is_empty() || !statuses.iter().all(|s| s.is_terminal()) {
        return None;
    }
    if statuses.contains(&ResultStatus::Success) {
        Some(AnalysisStatus::Completed)
    } else {
        Some(AnalysisStatus::Failed)
    }
}
