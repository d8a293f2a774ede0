//! Child result rows: predictions, timelines, insights, sources
//!
//! Every write is a single `INSERT .. ON CONFLICT .. DO UPDATE .. WHERE`
//! statement. The `WHERE` clause only lets a row move forward in its
//! lifecycle; a blocked write returns no row and is reported as
//! `Error::InvalidTransition` with the row left untouched.
//!
//! Updates merge: a field absent from the callback keeps its stored value.
//! The exception is a terminal write over a different terminal status (a
//! timed-out row that later succeeds, a success re-delivered as an error):
//! that write replaces the previous result, so omitted fields are cleared.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::models::{
    Insights, InsightsUpdate, ModelPrediction, PredictionUpdate, ResultKind, ResultStatus, Sources,
    Timeline, TimelineUpdate,
};
use super::rows;
use crate::{time, Error, Result};

/// Identifies one child result row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub analysis_id: Uuid,
    pub kind: ResultKind,
    /// Set for predictions only
    pub model_name: Option<String>,
}

/// SQL expression ranking a status column in the forward-only lifecycle
fn rank_sql(column: &str) -> String {
    format!(
        "(CASE {} WHEN 'pending' THEN 0 WHEN 'processing' THEN 1 ELSE 2 END)",
        column
    )
}

/// Assignments for `columns`, each `(column, incoming value, cleared value)`
///
/// The incoming value wins when present. Otherwise the stored value is kept,
/// unless the write replaces a different terminal result, in which case the
/// column takes its cleared value.
fn merge_sql(table: &str, columns: &[(&str, &str, &str)]) -> String {
    let replaces = format!(
        "({} = 2 AND {}.status <> excluded.status)",
        rank_sql(&format!("{}.status", table)),
        table
    );

    columns
        .iter()
        .map(|(column, incoming, cleared)| {
            format!(
                "{column} = CASE WHEN {replaces} THEN COALESCE({incoming}, {cleared}) \
                 ELSE COALESCE({incoming}, {table}.{column}) END",
                column = column,
                replaces = replaces,
                incoming = incoming,
                cleared = cleared,
                table = table,
            )
        })
        .collect::<Vec<_>>()
        .join(",\n            ")
}

fn completed_at_for(status: ResultStatus) -> Option<String> {
    status.is_terminal().then(time::now_db)
}

async fn ensure_analysis_exists(pool: &SqlitePool, analysis_id: Uuid) -> Result<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM analyses WHERE id = ?")
        .bind(analysis_id.to_string())
        .fetch_optional(pool)
        .await?;

    match exists {
        Some(_) => Ok(()),
        None => Err(Error::NotFound(format!("Analysis not found: {}", analysis_id))),
    }
}

fn rejected(entity: String, current: Option<String>, to: ResultStatus) -> Error {
    Error::InvalidTransition {
        entity,
        from: current.unwrap_or_else(|| "unknown".to_string()),
        to: to.to_string(),
    }
}

// ============================================================================
// Model predictions
// ============================================================================

fn prediction_from_row(row: &SqliteRow) -> Result<ModelPrediction> {
    Ok(ModelPrediction {
        id: rows::uuid(row, "id")?,
        analysis_id: rows::uuid(row, "analysis_id")?,
        model_name: row.try_get("model_name")?,
        status: rows::parsed(row, "status")?,
        outcome: rows::opt_parsed(row, "outcome")?,
        confidence_percent: row.try_get("confidence_percent")?,
        reasoning: row.try_get("reasoning")?,
        sources_count: row.try_get("sources_count")?,
        error: row.try_get("error")?,
        raw_response: rows::opt_json(row, "raw_response")?,
        requested_at: rows::timestamp(row, "requested_at")?,
        completed_at: rows::opt_timestamp(row, "completed_at")?,
    })
}

/// All predictions of an analysis, ordered by model name
pub async fn get_predictions(pool: &SqlitePool, analysis_id: Uuid) -> Result<Vec<ModelPrediction>> {
    let rows = sqlx::query(
        "SELECT * FROM model_predictions WHERE analysis_id = ? ORDER BY model_name",
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(prediction_from_row).collect()
}

pub async fn get_prediction(
    pool: &SqlitePool,
    analysis_id: Uuid,
    model_name: &str,
) -> Result<Option<ModelPrediction>> {
    let row = sqlx::query("SELECT * FROM model_predictions WHERE analysis_id = ? AND model_name = ?")
        .bind(analysis_id.to_string())
        .bind(model_name)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(prediction_from_row).transpose()
}

/// Insert or advance the prediction keyed by `(analysis_id, model_name)`
pub async fn upsert_prediction(
    pool: &SqlitePool,
    analysis_id: Uuid,
    model_name: &str,
    status: ResultStatus,
    update: &PredictionUpdate,
) -> Result<ModelPrediction> {
    ensure_analysis_exists(pool, analysis_id).await?;

    let sql = format!(
        r#"
        INSERT INTO model_predictions (
            id, analysis_id, model_name, status, outcome, confidence_percent,
            reasoning, sources_count, error, raw_response, requested_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(analysis_id, model_name) DO UPDATE SET
            {},
            status = excluded.status,
            completed_at = excluded.completed_at
        WHERE {} <= {}
        RETURNING id
        "#,
        merge_sql(
            "model_predictions",
            &[
                ("outcome", "excluded.outcome", "NULL"),
                ("confidence_percent", "excluded.confidence_percent", "NULL"),
                ("reasoning", "excluded.reasoning", "NULL"),
                ("sources_count", "excluded.sources_count", "NULL"),
                ("error", "excluded.error", "NULL"),
                ("raw_response", "excluded.raw_response", "NULL"),
            ],
        ),
        rank_sql("model_predictions.status"),
        rank_sql("excluded.status"),
    );

    let raw_response = rows::to_json(update.raw_response.as_ref())?;

    let written: Option<String> = sqlx::query_scalar(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(analysis_id.to_string())
        .bind(model_name)
        .bind(status.as_str())
        .bind(update.outcome.map(|o| o.as_str()))
        .bind(update.confidence_percent)
        .bind(update.reasoning.as_deref())
        .bind(update.sources_count)
        .bind(update.error.as_deref())
        .bind(raw_response)
        .bind(time::now_db())
        .bind(completed_at_for(status))
        .fetch_optional(pool)
        .await?;

    if written.is_none() {
        let current = get_prediction(pool, analysis_id, model_name)
            .await?
            .map(|p| p.status.to_string());
        return Err(rejected(format!("prediction {}", model_name), current, status));
    }

    get_prediction(pool, analysis_id, model_name)
        .await?
        .ok_or_else(|| Error::Internal(format!("Prediction {} vanished after upsert", model_name)))
}

// ============================================================================
// Timelines
// ============================================================================

fn timeline_from_row(row: &SqliteRow) -> Result<Timeline> {
    Ok(Timeline {
        id: rows::uuid(row, "id")?,
        analysis_id: rows::uuid(row, "analysis_id")?,
        status: rows::parsed(row, "status")?,
        events: rows::json(row, "events")?,
        error: row.try_get("error")?,
        raw_response: rows::opt_json(row, "raw_response")?,
        requested_at: rows::timestamp(row, "requested_at")?,
        completed_at: rows::opt_timestamp(row, "completed_at")?,
    })
}

pub async fn get_timeline(pool: &SqlitePool, analysis_id: Uuid) -> Result<Option<Timeline>> {
    let row = sqlx::query("SELECT * FROM timelines WHERE analysis_id = ?")
        .bind(analysis_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(timeline_from_row).transpose()
}

/// Insert or advance the timeline of an analysis
pub async fn upsert_timeline(
    pool: &SqlitePool,
    analysis_id: Uuid,
    status: ResultStatus,
    update: &TimelineUpdate,
) -> Result<Timeline> {
    ensure_analysis_exists(pool, analysis_id).await?;

    let sql = format!(
        r#"
        INSERT INTO timelines (
            id, analysis_id, status, events, error, raw_response, requested_at, completed_at
        ) VALUES (?1, ?2, ?3, COALESCE(?4, '[]'), ?5, ?6, ?7, ?8)
        ON CONFLICT(analysis_id) DO UPDATE SET
            {},
            status = excluded.status,
            completed_at = excluded.completed_at
        WHERE {} <= {}
        RETURNING id
        "#,
        merge_sql(
            "timelines",
            &[
                ("events", "?4", "'[]'"),
                ("error", "excluded.error", "NULL"),
                ("raw_response", "excluded.raw_response", "NULL"),
            ],
        ),
        rank_sql("timelines.status"),
        rank_sql("excluded.status"),
    );

    let written: Option<String> = sqlx::query_scalar(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(analysis_id.to_string())
        .bind(status.as_str())
        .bind(rows::to_json(update.events.as_ref())?)
        .bind(update.error.as_deref())
        .bind(rows::to_json(update.raw_response.as_ref())?)
        .bind(time::now_db())
        .bind(completed_at_for(status))
        .fetch_optional(pool)
        .await?;

    if written.is_none() {
        let current = get_timeline(pool, analysis_id)
            .await?
            .map(|t| t.status.to_string());
        return Err(rejected("timeline".to_string(), current, status));
    }

    get_timeline(pool, analysis_id)
        .await?
        .ok_or_else(|| Error::Internal("Timeline vanished after upsert".to_string()))
}

// ============================================================================
// Insights
// ============================================================================

fn insights_from_row(row: &SqliteRow) -> Result<Insights> {
    Ok(Insights {
        id: rows::uuid(row, "id")?,
        analysis_id: rows::uuid(row, "analysis_id")?,
        status: rows::parsed(row, "status")?,
        consensus: rows::opt_json(row, "consensus")?,
        risks: rows::json(row, "risks")?,
        opportunities: rows::json(row, "opportunities")?,
        trends: rows::json(row, "trends")?,
        content: row.try_get("content")?,
        error: row.try_get("error")?,
        raw_response: rows::opt_json(row, "raw_response")?,
        requested_at: rows::timestamp(row, "requested_at")?,
        completed_at: rows::opt_timestamp(row, "completed_at")?,
    })
}

pub async fn get_insights(pool: &SqlitePool, analysis_id: Uuid) -> Result<Option<Insights>> {
    let row = sqlx::query("SELECT * FROM insights WHERE analysis_id = ?")
        .bind(analysis_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(insights_from_row).transpose()
}

/// Insert or advance the insights of an analysis
pub async fn upsert_insights(
    pool: &SqlitePool,
    analysis_id: Uuid,
    status: ResultStatus,
    update: &InsightsUpdate,
) -> Result<Insights> {
    ensure_analysis_exists(pool, analysis_id).await?;

    let sql = format!(
        r#"
        INSERT INTO insights (
            id, analysis_id, status, consensus, risks, opportunities, trends,
            content, error, raw_response, requested_at, completed_at
        ) VALUES (
            ?1, ?2, ?3, ?4, COALESCE(?5, '[]'), COALESCE(?6, '[]'), COALESCE(?7, '[]'),
            ?8, ?9, ?10, ?11, ?12
        )
        ON CONFLICT(analysis_id) DO UPDATE SET
            {},
            status = excluded.status,
            completed_at = excluded.completed_at
        WHERE {} <= {}
        RETURNING id
        "#,
        merge_sql(
            "insights",
            &[
                ("consensus", "excluded.consensus", "NULL"),
                ("risks", "?5", "'[]'"),
                ("opportunities", "?6", "'[]'"),
                ("trends", "?7", "'[]'"),
                ("content", "excluded.content", "NULL"),
                ("error", "excluded.error", "NULL"),
                ("raw_response", "excluded.raw_response", "NULL"),
            ],
        ),
        rank_sql("insights.status"),
        rank_sql("excluded.status"),
    );

    let written: Option<String> = sqlx::query_scalar(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(analysis_id.to_string())
        .bind(status.as_str())
        .bind(rows::to_json(update.consensus.as_ref())?)
        .bind(rows::to_json(update.risks.as_ref())?)
        .bind(rows::to_json(update.opportunities.as_ref())?)
        .bind(rows::to_json(update.trends.as_ref())?)
        .bind(update.content.as_deref())
        .bind(update.error.as_deref())
        .bind(rows::to_json(update.raw_response.as_ref())?)
        .bind(time::now_db())
        .bind(completed_at_for(status))
        .fetch_optional(pool)
        .await?;

    if written.is_none() {
        let current = get_insights(pool, analysis_id)
            .await?
            .map(|i| i.status.to_string());
        return Err(rejected("insights".to_string(), current, status));
    }

    get_insights(pool, analysis_id)
        .await?
        .ok_or_else(|| Error::Internal("Insights vanished after upsert".to_string()))
}

// ============================================================================
// Sources
// ============================================================================

fn sources_from_row(row: &SqliteRow) -> Result<Sources> {
    Ok(Sources {
        id: rows::uuid(row, "id")?,
        analysis_id: rows::uuid(row, "analysis_id")?,
        status: rows::parsed(row, "status")?,
        links: rows::json(row, "links")?,
        raw_response: rows::opt_json(row, "raw_response")?,
        requested_at: rows::timestamp(row, "requested_at")?,
        completed_at: rows::opt_timestamp(row, "completed_at")?,
    })
}

pub async fn get_sources(pool: &SqlitePool, analysis_id: Uuid) -> Result<Option<Sources>> {
    let row = sqlx::query("SELECT * FROM sources WHERE analysis_id = ?")
        .bind(analysis_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(sources_from_row).transpose()
}

/// Store the source list of an analysis (always a terminal `success` write)
pub async fn upsert_sources(
    pool: &SqlitePool,
    analysis_id: Uuid,
    links: &[String],
    raw_response: Option<&serde_json::Value>,
) -> Result<Sources> {
    ensure_analysis_exists(pool, analysis_id).await?;

    let now = time::now_db();
    sqlx::query(
        r#"
        INSERT INTO sources (id, analysis_id, status, links, raw_response, requested_at, completed_at)
        VALUES (?, ?, 'success', ?, ?, ?, ?)
        ON CONFLICT(analysis_id) DO UPDATE SET
            status = excluded.status,
            links = excluded.links,
            raw_response = COALESCE(excluded.raw_response, sources.raw_response),
            completed_at = excluded.completed_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(analysis_id.to_string())
    .bind(serde_json::to_string(links)?)
    .bind(rows::to_json(raw_response)?)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_sources(pool, analysis_id)
        .await?
        .ok_or_else(|| Error::Internal("Sources vanished after upsert".to_string()))
}

// ============================================================================
// Lifecycle sweeps
// ============================================================================

fn table_for(kind: ResultKind) -> &'static str {
    match kind {
        ResultKind::Prediction => "model_predictions",
        ResultKind::Timeline => "timelines",
        ResultKind::Insights => "insights",
        ResultKind::Sources => "sources",
    }
}

/// Move a placeholder `pending → processing` after its trigger was delivered
///
/// Returns false when the row already moved on (e.g. the callback won the race).
pub async fn mark_processing(
    pool: &SqlitePool,
    analysis_id: Uuid,
    kind: ResultKind,
    model_name: Option<&str>,
) -> Result<bool> {
    let result = match (kind, model_name) {
        (ResultKind::Prediction, Some(model)) => {
            sqlx::query(
                "UPDATE model_predictions SET status = 'processing' \
                 WHERE analysis_id = ? AND model_name = ? AND status = 'pending'",
            )
            .bind(analysis_id.to_string())
            .bind(model)
            .execute(pool)
            .await?
        }
        (ResultKind::Prediction, None) => {
            return Err(Error::InvalidInput(
                "model_name is required for predictions".to_string(),
            ))
        }
        (kind, _) => {
            let sql = format!(
                "UPDATE {} SET status = 'processing' WHERE analysis_id = ? AND status = 'pending'",
                table_for(kind)
            );
            sqlx::query(&sql)
                .bind(analysis_id.to_string())
                .execute(pool)
                .await?
        }
    };

    Ok(result.rows_affected() > 0)
}

/// Force every unfinished gating result into a terminal state
async fn finish_unfinished(
    pool: &SqlitePool,
    status: ResultStatus,
    message: &str,
    analysis_id: Option<Uuid>,
    requested_before: Option<DateTime<Utc>>,
) -> Result<Vec<ResultRef>> {
    let now = time::now_db();
    let cutoff = requested_before.map(time::to_db);
    let mut finished = Vec::new();

    for kind in [ResultKind::Prediction, ResultKind::Timeline, ResultKind::Insights] {
        let returning = if kind == ResultKind::Prediction {
            "analysis_id, model_name"
        } else {
            "analysis_id, NULL AS model_name"
        };
        let sql = format!(
            r#"
            UPDATE {}
            SET status = ?1, error = COALESCE(error, ?2), completed_at = ?3
            WHERE status IN ('pending', 'processing')
              AND (?4 IS NULL OR analysis_id = ?4)
              AND (?5 IS NULL OR requested_at < ?5)
            RETURNING {}
            "#,
            table_for(kind),
            returning
        );

        let updated = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(message)
            .bind(&now)
            .bind(analysis_id.map(|id| id.to_string()))
            .bind(cutoff.as_deref())
            .fetch_all(pool)
            .await?;

        for row in &updated {
            finished.push(ResultRef {
                analysis_id: rows::uuid(row, "analysis_id")?,
                kind,
                model_name: row.try_get("model_name")?,
            });
        }
    }

    Ok(finished)
}

/// Time out results still pending/processing that were requested before `cutoff`
pub async fn expire_stale(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
    message: &str,
) -> Result<Vec<ResultRef>> {
    finish_unfinished(pool, ResultStatus::Timeout, message, None, Some(cutoff)).await
}

/// Fail every unfinished result of one analysis
pub async fn fail_unfinished(
    pool: &SqlitePool,
    analysis_id: Uuid,
    message: &str,
) -> Result<Vec<ResultRef>> {
    finish_unfinished(pool, ResultStatus::Error, message, Some(analysis_id), None).await
}
