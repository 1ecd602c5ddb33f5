use chrono::Utc;
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{BankEntryUpdate, BankTransactionEntry, NewBankEntry},
    traits::{BankEntryQueryFilter, InsertBankEntryResult},
};

const ENTRY_COLUMNS: &str = "id, portal_id, portal_transaction_id, order_code, bank_account_id, bank_code, amount, \
                             direction, description, balance_after, transaction_date, status, actor, notes, \
                             created_at, updated_at";

/// Records the entry unless the `(portal_id, portal_transaction_id)` pair already exists, in which case the existing
/// entry is returned. The unique index makes this safe against concurrent deliveries of the same transaction.
pub async fn idempotent_insert(
    entry: NewBankEntry,
    conn: &mut SqliteConnection,
) -> Result<InsertBankEntryResult, SqliteDatabaseError> {
    let now = Utc::now();
    let sql = format!(
        r#"
        INSERT INTO bank_transactions (
            portal_id, portal_transaction_id, order_code, amount, direction, description, balance_after,
            transaction_date, status, actor, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $10, $10)
        ON CONFLICT (portal_id, portal_transaction_id) DO NOTHING
        RETURNING {ENTRY_COLUMNS};
        "#
    );
    let inserted = sqlx::query_as::<_, BankTransactionEntry>(&sql)
        .bind(entry.portal_id.as_str())
        .bind(entry.portal_transaction_id.as_str())
        .bind(entry.order_code.clone())
        .bind(entry.amount)
        .bind(entry.direction)
        .bind(entry.description.as_str())
        .bind(entry.balance_after)
        .bind(entry.transaction_date)
        .bind(entry.actor.as_str())
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(e) = inserted {
        debug!("🗃️ Bank entry {}/{} recorded with id {}", e.portal_id, e.portal_transaction_id, e.id);
        return Ok(InsertBankEntryResult::Inserted(e));
    }
    let filter = BankEntryQueryFilter::default()
        .with_portal_transaction(entry.portal_id.as_str(), entry.portal_transaction_id.as_str());
    let existing = fetch_entries(&filter, conn).await?.into_iter().next().ok_or_else(|| {
        SqliteDatabaseError::QueryError(format!(
            "Bank entry {}/{} conflicted on insert but could not be read back",
            entry.portal_id, entry.portal_transaction_id
        ))
    })?;
    debug!("🗃️ Bank entry {}/{} already exists as #{}", entry.portal_id, entry.portal_transaction_id, existing.id);
    Ok(InsertBankEntryResult::AlreadyExists(existing))
}

pub async fn fetch_entries(
    query: &BankEntryQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<BankTransactionEntry>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {ENTRY_COLUMNS} FROM bank_transactions WHERE 1 = 1"));
    if let Some((portal_id, tx_id)) = &query.portal_key {
        builder.push(" AND portal_id = ");
        builder.push_bind(portal_id.clone());
        builder.push(" AND portal_transaction_id = ");
        builder.push_bind(tx_id.clone());
    }
    if let Some(code) = &query.order_code {
        builder.push(" AND order_code = ");
        builder.push_bind(code.as_str().to_string());
    }
    if !query.statuses.is_empty() {
        let statuses = query.statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        builder.push(format!(" AND status IN ({statuses})"));
    }
    builder.push(" ORDER BY id ASC");
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(limit));
    }
    trace!("🗃️ Executing query: {}", builder.sql());
    let entries = builder.build_query_as::<BankTransactionEntry>().fetch_all(conn).await?;
    Ok(entries)
}

pub async fn update_entry(
    id: i64,
    update: BankEntryUpdate,
    conn: &mut SqliteConnection,
) -> Result<BankTransactionEntry, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE bank_transactions SET updated_at = ");
    builder.push_bind(Utc::now());
    if let Some(status) = update.status {
        builder.push(", status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(account_id) = update.bank_account_id {
        builder.push(", bank_account_id = ");
        builder.push_bind(account_id);
    }
    if let Some(bank_code) = update.bank_code {
        builder.push(", bank_code = ");
        builder.push_bind(bank_code);
    }
    if let Some(note) = update.note {
        builder.push(", notes = CASE WHEN notes = '' THEN ");
        builder.push_bind(note.clone());
        builder.push(" ELSE notes || char(10) || ");
        builder.push_bind(note);
        builder.push(" END");
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {ENTRY_COLUMNS}"));
    trace!("🗃️ Executing query: {}", builder.sql());
    builder
        .build_query_as::<BankTransactionEntry>()
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| SqliteDatabaseError::NotFound(format!("Bank entry #{id}")))
}
