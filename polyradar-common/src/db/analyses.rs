//! Analysis rows and the joined analysis view

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::models::{Analysis, AnalysisStatus, AnalysisView, TransactionKind};
use super::{results, rows, users};
use crate::{time, Error, Result};

/// Input for [`create_analysis`]
#[derive(Debug, Clone)]
pub struct NewAnalysis<'a> {
    pub event_url: &'a str,
    pub event_title: Option<&'a str>,
    /// Owner to charge; anonymous analyses are free
    pub user_id: Option<Uuid>,
    /// One pending prediction placeholder is created per model
    pub model_names: &'a [String],
    pub cost: i64,
}

fn analysis_from_row(row: &SqliteRow) -> Result<Analysis> {
    Ok(Analysis {
        id: rows::uuid(row, "id")?,
        user_id: rows::opt_uuid(row, "user_id")?,
        event_url: row.try_get("event_url")?,
        event_title: row.try_get("event_title")?,
        status: rows::parsed(row, "status")?,
        error_message: row.try_get("error_message")?,
        created_at: rows::timestamp(row, "created_at")?,
        updated_at: rows::timestamp(row, "updated_at")?,
        completed_at: rows::opt_timestamp(row, "completed_at")?,
    })
}

/// Create a `processing` analysis with pending placeholders for every result
///
/// Charging the owner, writing the spend entry and creating the placeholders
/// happen in one transaction: either all of it is stored or none of it.
pub async fn create_analysis(pool: &SqlitePool, new: &NewAnalysis<'_>) -> Result<Analysis> {
    let id = Uuid::new_v4();
    let now = time::now_db();
    let mut tx = pool.begin().await?;

    if let Some(user_id) = new.user_id {
        if new.cost > 0 {
            users::charge(&mut *tx, user_id, new.cost).await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO analyses (id, user_id, event_url, event_title, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'processing', ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.user_id.map(|u| u.to_string()))
    .bind(new.event_url)
    .bind(new.event_title)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    if let Some(user_id) = new.user_id {
        if new.cost > 0 {
            users::insert_transaction(
                &mut *tx,
                user_id,
                TransactionKind::Spend,
                -new.cost,
                &format!("Analysis for {}", new.event_url),
                Some(id),
            )
            .await?;
        }
    }

    for model_name in new.model_names {
        sqlx::query(
            r#"
            INSERT INTO model_predictions (id, analysis_id, model_name, status, requested_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(model_name)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    for table in ["timelines", "insights"] {
        let sql = format!(
            "INSERT INTO {} (id, analysis_id, status, requested_at) VALUES (?, ?, 'pending', ?)",
            table
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(id.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }

    let row = sqlx::query("SELECT * FROM analyses WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    let analysis = analysis_from_row(&row)?;

    tx.commit().await?;

    Ok(analysis)
}

pub async fn get_analysis(pool: &SqlitePool, id: Uuid) -> Result<Option<Analysis>> {
    let row = sqlx::query("SELECT * FROM analyses WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(analysis_from_row).transpose()
}

pub async fn analysis_exists(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM analyses WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Load an analysis together with all of its results
pub async fn load_view(pool: &SqlitePool, id: Uuid) -> Result<Option<AnalysisView>> {
    let Some(analysis) = get_analysis(pool, id).await? else {
        return Ok(None);
    };

    let predictions = results::get_predictions(pool, id).await?;
    let timeline = results::get_timeline(pool, id).await?;
    let insights = results::get_insights(pool, id).await?;
    let sources = results::get_sources(pool, id).await?;

    Ok(Some(AnalysisView::new(
        analysis,
        predictions,
        timeline,
        insights,
        sources,
    )))
}

/// Analyses owned by a user, newest first
pub async fn list_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Analysis>> {
    let rows = sqlx::query(
        "SELECT * FROM analyses WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(analysis_from_row).collect()
}

/// Move a `processing` analysis to a terminal status
///
/// Returns `Ok(true)` when the row changed and `Ok(false)` when it already
/// holds `status` (a redelivered transition). Any other move out of a
/// terminal status is `Error::InvalidTransition`.
pub async fn transition_status(
    pool: &SqlitePool,
    id: Uuid,
    status: AnalysisStatus,
    error_message: Option<&str>,
) -> Result<bool> {
    if !status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "Analysis can only move to a terminal status, got '{}'",
            status
        )));
    }

    let now = time::now_db();
    let updated = sqlx::query(
        r#"
        UPDATE analyses
        SET status = ?1,
            error_message = COALESCE(?2, error_message),
            updated_at = ?3,
            completed_at = ?3
        WHERE id = ?4 AND status = 'processing'
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if updated.rows_affected() > 0 {
        return Ok(true);
    }

    match get_analysis(pool, id).await? {
        None => Err(Error::NotFound(format!("Analysis not found: {}", id))),
        Some(current) if current.status == status => Ok(false),
        Some(current) => Err(Error::InvalidTransition {
            entity: format!("analysis {}", id),
            from: current.status.to_string(),
            to: status.to_string(),
        }),
    }
}
