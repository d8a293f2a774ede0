//! Store behaviour: analysis creation, forward-only result writes, billing

use chrono::{Duration, Utc};
use polyradar_common::db::{
    analyses, init_database, results, users, AnalysisStatus, InsightsUpdate, NewAnalysis, Outcome,
    PredictionUpdate, ResultKind, ResultStatus, TimelineEvent, TimelineUpdate, TransactionKind,
};
use polyradar_common::Error;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

const URL: &str = "https://polymarket.com/event/fed-decision-in-december";

async fn setup() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("test.db")).await.unwrap();
    (dir, pool)
}

fn models() -> Vec<String> {
    vec!["model1".to_string(), "model2".to_string()]
}

async fn create(pool: &SqlitePool, user_id: Option<Uuid>) -> Uuid {
    let models = models();
    analyses::create_analysis(
        pool,
        &NewAnalysis {
            event_url: URL,
            event_title: Some("Fed Decision In December"),
            user_id,
            model_names: &models,
            cost: 100,
        },
    )
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn test_create_analysis_writes_placeholders() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    let view = analyses::load_view(&pool, id).await.unwrap().unwrap();
    assert_eq!(view.analysis.status, AnalysisStatus::Processing);
    assert_eq!(view.analysis.event_title.as_deref(), Some("Fed Decision In December"));
    assert_eq!(view.predictions.len(), 2);
    assert!(view
        .predictions
        .iter()
        .all(|p| p.status == ResultStatus::Pending));
    assert_eq!(view.timeline.unwrap().status, ResultStatus::Pending);
    assert_eq!(view.insights.unwrap().status, ResultStatus::Pending);
    assert!(view.sources.is_none());
    assert_eq!(view.progress.expected, 4);
    assert_eq!(view.progress.finished, 0);
    assert!(!view.progress.settled);
}

#[tokio::test]
async fn test_create_analysis_charges_owner() {
    let (_dir, pool) = setup().await;
    let user = users::get_or_create_user(&pool, "0xabc", 500).await.unwrap();

    let id = create(&pool, Some(user.id)).await;

    let user = users::get_user(&pool, user.id).await.unwrap().unwrap();
    assert_eq!(user.radar_balance, 400);

    let ledger = users::list_transactions(&pool, user.id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].kind, TransactionKind::Spend);
    assert_eq!(ledger[0].amount, -100);
    assert_eq!(ledger[0].analysis_id, Some(id));

    let owned = analyses::list_for_user(&pool, user.id).await.unwrap();
    assert_eq!(owned.len(), 1);
}

#[tokio::test]
async fn test_insufficient_balance_stores_nothing() {
    let (_dir, pool) = setup().await;
    let user = users::get_or_create_user(&pool, "0xpoor", 50).await.unwrap();
    let models = models();

    let err = analyses::create_analysis(
        &pool,
        &NewAnalysis {
            event_url: URL,
            event_title: None,
            user_id: Some(user.id),
            model_names: &models,
            cost: 100,
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::InsufficientBalance {
            balance: 50,
            required: 100
        }
    ));
    assert!(analyses::list_for_user(&pool, user.id).await.unwrap().is_empty());
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analyses")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_get_or_create_user_is_idempotent() {
    let (_dir, pool) = setup().await;
    let first = users::get_or_create_user(&pool, " 0xabc ", 500).await.unwrap();
    let second = users::get_or_create_user(&pool, "0xabc", 999).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.radar_balance, 500);
    assert_eq!(second.wallet_address, "0xabc");
    assert!(matches!(
        users::get_or_create_user(&pool, "  ", 500).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_prediction_upsert_merges_fields() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_prediction(
        &pool,
        id,
        "model1",
        ResultStatus::Processing,
        &PredictionUpdate {
            reasoning: Some("thinking".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let done = results::upsert_prediction(
        &pool,
        id,
        "model1",
        ResultStatus::Success,
        &PredictionUpdate {
            outcome: Some(Outcome::Yes),
            confidence_percent: Some(72.5),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(done.status, ResultStatus::Success);
    assert_eq!(done.outcome, Some(Outcome::Yes));
    assert_eq!(done.confidence_percent, Some(72.5));
    assert_eq!(done.reasoning.as_deref(), Some("thinking"));
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_prediction_for_unknown_model_creates_row() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_prediction(
        &pool,
        id,
        "model9",
        ResultStatus::Success,
        &PredictionUpdate::default(),
    )
    .await
    .unwrap();

    assert_eq!(results::get_predictions(&pool, id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_result_status_never_moves_backwards() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_timeline(&pool, id, ResultStatus::Success, &TimelineUpdate::default())
        .await
        .unwrap();

    let err = results::upsert_timeline(&pool, id, ResultStatus::Processing, &TimelineUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let err = results::upsert_prediction(
        &pool,
        id,
        "model1",
        ResultStatus::Pending,
        &PredictionUpdate::default(),
    )
    .await;
    assert!(err.is_ok(), "pending over pending is a no-op write");

    results::upsert_prediction(&pool, id, "model1", ResultStatus::Error, &PredictionUpdate::default())
        .await
        .unwrap();
    assert!(matches!(
        results::upsert_prediction(&pool, id, "model1", ResultStatus::Pending, &PredictionUpdate::default())
            .await,
        Err(Error::InvalidTransition { .. })
    ));

    let timeline = results::get_timeline(&pool, id).await.unwrap().unwrap();
    assert_eq!(timeline.status, ResultStatus::Success);
}

#[tokio::test]
async fn test_terminal_redelivery_replaces_content() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    let event = |title: &str| TimelineEvent {
        date: "2025-12-10".to_string(),
        title: title.to_string(),
        description: String::new(),
        impact: None,
        source_url: None,
    };

    results::upsert_timeline(
        &pool,
        id,
        ResultStatus::Success,
        &TimelineUpdate {
            events: Some(vec![event("first")]),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let timeline = results::upsert_timeline(
        &pool,
        id,
        ResultStatus::Success,
        &TimelineUpdate {
            events: Some(vec![event("second"), event("third")]),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(timeline.events.len(), 2);
    assert_eq!(timeline.events[0].title, "second");
}

#[tokio::test]
async fn test_success_after_timeout_drops_timeout_error() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::expire_stale(&pool, Utc::now() + Duration::seconds(1), "No response within 900 seconds")
        .await
        .unwrap();

    let late = results::upsert_prediction(
        &pool,
        id,
        "model1",
        ResultStatus::Success,
        &PredictionUpdate {
            outcome: Some(Outcome::Yes),
            confidence_percent: Some(80.0),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(late.status, ResultStatus::Success);
    assert_eq!(late.outcome, Some(Outcome::Yes));
    assert!(late.error.is_none());

    let timeline = results::upsert_timeline(
        &pool,
        id,
        ResultStatus::Success,
        &TimelineUpdate::default(),
    )
    .await
    .unwrap();
    assert!(timeline.error.is_none());
}

#[tokio::test]
async fn test_error_after_success_drops_prediction() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_prediction(
        &pool,
        id,
        "model1",
        ResultStatus::Success,
        &PredictionUpdate {
            outcome: Some(Outcome::Yes),
            confidence_percent: Some(80.0),
            reasoning: Some("strong signal".to_string()),
            sources_count: Some(3),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let failed = results::upsert_prediction(
        &pool,
        id,
        "model1",
        ResultStatus::Error,
        &PredictionUpdate {
            error: Some("boom".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert!(failed.outcome.is_none());
    assert!(failed.confidence_percent.is_none());
    assert!(failed.reasoning.is_none());
    assert!(failed.sources_count.is_none());
}

#[tokio::test]
async fn test_insights_error_after_success_clears_content() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_insights(
        &pool,
        id,
        ResultStatus::Success,
        &InsightsUpdate {
            content: Some("Markets lean YES".to_string()),
            risks: Some(vec![]),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let insights = results::upsert_insights(
        &pool,
        id,
        ResultStatus::Timeout,
        &InsightsUpdate {
            error: Some("late".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(insights.content.is_none());
    assert!(insights.risks.is_empty());
    assert_eq!(insights.error.as_deref(), Some("late"));
}

#[tokio::test]
async fn test_same_status_redelivery_keeps_omitted_fields() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_prediction(
        &pool,
        id,
        "model2",
        ResultStatus::Success,
        &PredictionUpdate {
            outcome: Some(Outcome::No),
            reasoning: Some("weak demand".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let again = results::upsert_prediction(
        &pool,
        id,
        "model2",
        ResultStatus::Success,
        &PredictionUpdate {
            confidence_percent: Some(55.0),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(again.outcome, Some(Outcome::No));
    assert_eq!(again.reasoning.as_deref(), Some("weak demand"));
    assert_eq!(again.confidence_percent, Some(55.0));
}

#[tokio::test]
async fn test_insights_without_lists_keep_stored_values() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    let insights = results::upsert_insights(
        &pool,
        id,
        ResultStatus::Success,
        &InsightsUpdate {
            content: Some("Markets lean YES".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(insights.content.as_deref(), Some("Markets lean YES"));
    assert!(insights.risks.is_empty());
    assert!(insights.consensus.is_none());
}

#[tokio::test]
async fn test_results_for_unknown_analysis_are_not_found() {
    let (_dir, pool) = setup().await;
    let missing = Uuid::new_v4();

    assert!(matches!(
        results::upsert_timeline(&pool, missing, ResultStatus::Success, &TimelineUpdate::default())
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        results::upsert_sources(&pool, missing, &[], None).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sources_are_stored_as_success() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    let links = vec!["https://a.example".to_string(), "https://b.example".to_string()];
    let sources = results::upsert_sources(&pool, id, &links, Some(&serde_json::json!({ "links": links })))
        .await
        .unwrap();

    assert_eq!(sources.status, ResultStatus::Success);
    assert_eq!(sources.links, links);
    assert_eq!(sources.raw_response.unwrap()["links"][1], "https://b.example");

    let view = analyses::load_view(&pool, id).await.unwrap().unwrap();
    assert_eq!(view.progress.expected, 4, "sources never gate completion");
}

#[tokio::test]
async fn test_mark_processing_only_moves_pending_rows() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    assert!(results::mark_processing(&pool, id, ResultKind::Prediction, Some("model1"))
        .await
        .unwrap());
    assert!(!results::mark_processing(&pool, id, ResultKind::Prediction, Some("model1"))
        .await
        .unwrap());

    results::upsert_insights(&pool, id, ResultStatus::Success, &InsightsUpdate::default())
        .await
        .unwrap();
    assert!(!results::mark_processing(&pool, id, ResultKind::Insights, None)
        .await
        .unwrap());

    let prediction = results::get_prediction(&pool, id, "model1").await.unwrap().unwrap();
    assert_eq!(prediction.status, ResultStatus::Processing);
}

#[tokio::test]
async fn test_transition_status_rules() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    assert!(analyses::transition_status(&pool, id, AnalysisStatus::Completed, None)
        .await
        .unwrap());
    // Redelivery of the same terminal status is a no-op
    assert!(!analyses::transition_status(&pool, id, AnalysisStatus::Completed, None)
        .await
        .unwrap());
    assert!(matches!(
        analyses::transition_status(&pool, id, AnalysisStatus::Failed, Some("late")).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        analyses::transition_status(&pool, id, AnalysisStatus::Processing, None).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        analyses::transition_status(&pool, Uuid::new_v4(), AnalysisStatus::Failed, None).await,
        Err(Error::NotFound(_))
    ));

    let analysis = analyses::get_analysis(&pool, id).await.unwrap().unwrap();
    assert_eq!(analysis.status, AnalysisStatus::Completed);
    assert!(analysis.completed_at.is_some());
}

#[tokio::test]
async fn test_fail_unfinished_leaves_terminal_rows() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    results::upsert_prediction(&pool, id, "model1", ResultStatus::Success, &PredictionUpdate::default())
        .await
        .unwrap();

    let failed = results::fail_unfinished(&pool, id, "Analysis failed").await.unwrap();
    assert_eq!(failed.len(), 3);
    assert!(failed.iter().any(|r| r.model_name.as_deref() == Some("model2")));

    let view = analyses::load_view(&pool, id).await.unwrap().unwrap();
    let model1 = view.predictions.iter().find(|p| p.model_name == "model1").unwrap();
    let model2 = view.predictions.iter().find(|p| p.model_name == "model2").unwrap();
    assert_eq!(model1.status, ResultStatus::Success);
    assert!(model1.error.is_none());
    assert_eq!(model2.status, ResultStatus::Error);
    assert_eq!(model2.error.as_deref(), Some("Analysis failed"));
}

#[tokio::test]
async fn test_expire_stale_respects_cutoff() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;

    let none = results::expire_stale(&pool, Utc::now() - Duration::minutes(5), "timed out")
        .await
        .unwrap();
    assert!(none.is_empty());

    let expired = results::expire_stale(&pool, Utc::now() + Duration::seconds(1), "timed out")
        .await
        .unwrap();
    assert_eq!(expired.len(), 4);
    assert!(expired.iter().all(|r| r.analysis_id == id));

    let view = analyses::load_view(&pool, id).await.unwrap().unwrap();
    assert!(view
        .gating_statuses()
        .iter()
        .all(|s| *s == ResultStatus::Timeout));
}

#[tokio::test]
async fn test_refund_happens_once() {
    let (_dir, pool) = setup().await;
    let user = users::get_or_create_user(&pool, "0xabc", 500).await.unwrap();
    let id = create(&pool, Some(user.id)).await;

    let refund = users::refund_analysis(&pool, id).await.unwrap().unwrap();
    assert_eq!(refund.kind, TransactionKind::Refund);
    assert_eq!(refund.amount, 100);

    assert!(users::refund_analysis(&pool, id).await.unwrap().is_none());

    let user = users::get_user(&pool, user.id).await.unwrap().unwrap();
    assert_eq!(user.radar_balance, 500);
    assert_eq!(users::list_transactions(&pool, user.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_refund_of_anonymous_analysis_is_noop() {
    let (_dir, pool) = setup().await;
    let id = create(&pool, None).await;
    assert!(users::refund_analysis(&pool, id).await.unwrap().is_none());
}
