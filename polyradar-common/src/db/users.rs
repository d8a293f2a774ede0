//! Users and the RADAR token ledger

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::models::{Transaction, TransactionKind, User};
use super::rows;
use crate::{time, Error, Result};

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: rows::uuid(row, "id")?,
        wallet_address: row.try_get("wallet_address")?,
        radar_balance: row.try_get("radar_balance")?,
        created_at: rows::timestamp(row, "created_at")?,
        updated_at: rows::timestamp(row, "updated_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction> {
    Ok(Transaction {
        id: rows::uuid(row, "id")?,
        user_id: rows::uuid(row, "user_id")?,
        kind: rows::parsed(row, "type")?,
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        analysis_id: rows::opt_uuid(row, "analysis_id")?,
        created_at: rows::timestamp(row, "created_at")?,
    })
}

fn normalize_wallet(wallet_address: &str) -> Result<&str> {
    let wallet = wallet_address.trim();
    if wallet.is_empty() {
        return Err(Error::InvalidInput("wallet_address is required".to_string()));
    }
    Ok(wallet)
}

/// Look up a user by wallet, creating it with `initial_balance` on first sight
pub async fn get_or_create_user(
    pool: &SqlitePool,
    wallet_address: &str,
    initial_balance: i64,
) -> Result<User> {
    let wallet = normalize_wallet(wallet_address)?;
    let now = time::now_db();

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (id, wallet_address, radar_balance, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(wallet_address) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(wallet)
    .bind(initial_balance)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    if inserted.rows_affected() > 0 {
        tracing::info!(wallet = %wallet, balance = initial_balance, "Created user");
    }

    get_user_by_wallet(pool, wallet)
        .await?
        .ok_or_else(|| Error::Internal(format!("User {} vanished after insert", wallet)))
}

pub async fn get_user_by_wallet(pool: &SqlitePool, wallet_address: &str) -> Result<Option<User>> {
    let wallet = normalize_wallet(wallet_address)?;
    let row = sqlx::query("SELECT * FROM users WHERE wallet_address = ?")
        .bind(wallet)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn get_user(pool: &SqlitePool, user_id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

/// Ledger entries of a user, newest first
pub async fn list_transactions(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Transaction>> {
    let rows = sqlx::query(
        "SELECT * FROM transactions WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(transaction_from_row).collect()
}

/// Append one ledger entry (caller owns the surrounding transaction)
pub(crate) async fn insert_transaction(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    kind: TransactionKind,
    amount: i64,
    description: &str,
    analysis_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO transactions (id, user_id, type, amount, description, analysis_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(kind.as_str())
    .bind(amount)
    .bind(description)
    .bind(analysis_id.map(|id| id.to_string()))
    .bind(time::now_db())
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Deduct `amount` from a user's balance, failing if the balance is too low
pub(crate) async fn charge(conn: &mut SqliteConnection, user_id: Uuid, amount: i64) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE users
        SET radar_balance = radar_balance - ?1, updated_at = ?2
        WHERE id = ?3 AND radar_balance >= ?1
        "#,
    )
    .bind(amount)
    .bind(time::now_db())
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() > 0 {
        return Ok(());
    }

    let balance: Option<i64> = sqlx::query_scalar("SELECT radar_balance FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    match balance {
        Some(balance) => Err(Error::InsufficientBalance {
            balance,
            required: amount,
        }),
        None => Err(Error::NotFound(format!("User not found: {}", user_id))),
    }
}

/// Return the charge of a failed analysis to its owner
///
/// At most one refund is ever written per analysis. Returns the new ledger
/// entry, or `None` when the analysis is anonymous, was free, or was
/// already refunded.
pub async fn refund_analysis(pool: &SqlitePool, analysis_id: Uuid) -> Result<Option<Transaction>> {
    let mut tx = pool.begin().await?;

    let spend = sqlx::query(
        "SELECT user_id, amount FROM transactions WHERE analysis_id = ? AND type = 'spend'",
    )
    .bind(analysis_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(spend) = spend else {
        return Ok(None);
    };
    let user_id = rows::uuid(&spend, "user_id")?;
    let refund = -spend.try_get::<i64, _>("amount")?;
    if refund <= 0 {
        return Ok(None);
    }

    let id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO transactions (id, user_id, type, amount, description, analysis_id, created_at)
        VALUES (?, ?, 'refund', ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(refund)
    .bind("Refund for failed analysis")
    .bind(analysis_id.to_string())
    .bind(time::now_db())
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Ok(None);
    }

    sqlx::query("UPDATE users SET radar_balance = radar_balance + ?, updated_at = ? WHERE id = ?")
        .bind(refund)
        .bind(time::now_db())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?;

    let row = sqlx::query("SELECT * FROM transactions WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    let transaction = transaction_from_row(&row)?;

    tx.commit().await?;

    tracing::info!(
        analysis_id = %analysis_id,
        user_id = %user_id,
        amount = refund,
        "Refunded failed analysis"
    );

    Ok(Some(transaction))
}
