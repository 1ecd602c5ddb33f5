use chrono::Utc;
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{NewOrder, Order, OrderCode, OrderType, OrderUpdate},
    traits::{OrderQueryFilter, PendingNotificationCounts},
};

const ORDER_COLUMNS: &str = "id, order_code, order_type, status, requested_amount, amount_paid, amount_unpaid, \
                             amount_overpaid, merchant_id, merchant_order_id, callback_url, success_url, failure_url, \
                             cancel_url, bank_account_id, bank_receive_number, bank_receive_owner_name, \
                             is_sent_callback_notification, is_suspicious, notes, version, created_at, updated_at";

/// Inserts a new order. The unpaid amount starts out equal to the requested amount.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, SqliteDatabaseError> {
    let now = Utc::now();
    let sql = format!(
        r#"
        INSERT INTO orders (
            order_code, order_type, status, requested_amount, amount_paid, amount_unpaid, merchant_id,
            merchant_order_id, callback_url, success_url, failure_url, cancel_url, bank_account_id,
            bank_receive_number, bank_receive_owner_name, created_at, updated_at
        ) VALUES ($1, $2, 'pending', $3, 0, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {ORDER_COLUMNS};
        "#
    );
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(order.order_code)
        .bind(order.order_type)
        .bind(order.requested_amount)
        .bind(order.merchant_id)
        .bind(order.merchant_order_id)
        .bind(order.callback_url)
        .bind(order.success_url)
        .bind(order.failure_url)
        .bind(order.cancel_url)
        .bind(order.bank_account_id)
        .bind(order.bank_receive_number)
        .bind(order.bank_receive_owner_name)
        .bind(order.created_at)
        .bind(now)
        .fetch_one(conn)
        .await?;
    debug!("🗃️ Order {} saved with id {}", order.order_code, order.id);
    Ok(order)
}

pub async fn fetch_order(code: &OrderCode, conn: &mut SqliteConnection) -> Result<Option<Order>, SqliteDatabaseError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_code = $1 LIMIT 1");
    let order = sqlx::query_as::<_, Order>(&sql).bind(code.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`
///
/// Resulting orders are ordered by `created_at` in ascending order
pub async fn fetch_orders(
    query: &OrderQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {ORDER_COLUMNS} FROM orders "));
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if !query.order_codes.is_empty() {
        where_clause.push("order_code IN (");
        for (i, code) in query.order_codes.iter().enumerate() {
            if i > 0 {
                where_clause.push_unseparated(", ");
            }
            where_clause.push_bind_unseparated(code.as_str().to_string());
        }
        where_clause.push_unseparated(")");
    }
    if let Some(order_type) = query.order_type {
        where_clause.push("order_type = ");
        where_clause.push_bind_unseparated(order_type.to_string());
    }
    if !query.statuses.is_empty() {
        let statuses = query.statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("status IN ({statuses})"));
    }
    if let Some(cutoff) = query.created_before {
        where_clause.push("created_at < ");
        where_clause.push_bind_unseparated(cutoff);
    }
    if let Some(sent) = query.notification_sent {
        where_clause.push("is_sent_callback_notification = ");
        where_clause.push_bind_unseparated(sent);
    }
    match query.has_callback {
        Some(true) => {
            where_clause.push("callback_url IS NOT NULL AND TRIM(callback_url) <> ''");
        },
        Some(false) => {
            where_clause.push("(callback_url IS NULL OR TRIM(callback_url) = '')");
        },
        None => {},
    }
    if let Some(pattern) = &query.callback_contains {
        where_clause.push("INSTR(callback_url, ");
        where_clause.push_bind_unseparated(pattern.clone());
        where_clause.push_unseparated(") > 0");
    }
    builder.push(" ORDER BY created_at ASC");
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(limit));
    }
    trace!("🗃️ Executing query: {}", builder.sql());
    let orders = builder.build_query_as::<Order>().fetch_all(conn).await?;
    trace!("🗃️ Result of fetch_orders: {}", orders.len());
    Ok(orders)
}

/// Applies the update if, and only if, the stored version is still `expected_version`.
///
/// The note, if any, is appended to the existing notes on a new line.
pub async fn update_order(
    code: &OrderCode,
    expected_version: i64,
    update: OrderUpdate,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE orders SET version = version + 1, updated_at = ");
    builder.push_bind(Utc::now());
    if let Some(status) = update.status {
        builder.push(", status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(paid) = update.amount_paid {
        builder.push(", amount_paid = ");
        builder.push_bind(paid);
    }
    if let Some(unpaid) = update.amount_unpaid {
        builder.push(", amount_unpaid = ");
        builder.push_bind(unpaid);
    }
    if let Some(overpaid) = update.amount_overpaid {
        builder.push(", amount_overpaid = ");
        builder.push_bind(overpaid);
    }
    if let Some(sent) = update.is_sent_callback_notification {
        builder.push(", is_sent_callback_notification = ");
        builder.push_bind(sent);
    }
    if let Some(suspicious) = update.is_suspicious {
        builder.push(", is_suspicious = ");
        builder.push_bind(suspicious);
    }
    if let Some(note) = update.note {
        builder.push(", notes = CASE WHEN notes = '' THEN ");
        builder.push_bind(note.clone());
        builder.push(" ELSE notes || char(10) || ");
        builder.push_bind(note);
        builder.push(" END");
    }
    builder.push(" WHERE order_code = ");
    builder.push_bind(code.as_str().to_string());
    builder.push(" AND version = ");
    builder.push_bind(expected_version);
    builder.push(format!(" RETURNING {ORDER_COLUMNS}"));
    trace!("🗃️ Executing query: {}", builder.sql());
    let updated = builder.build_query_as::<Order>().fetch_optional(&mut *conn).await?;
    match updated {
        Some(order) => Ok(order),
        None => match fetch_order(code, conn).await? {
            Some(current) => {
                debug!(
                    "🗃️ Version check failed for {code}. Expected {expected_version}, found {}",
                    current.version
                );
                Err(SqliteDatabaseError::VersionConflict(code.to_string()))
            },
            None => Err(SqliteDatabaseError::NotFound(format!("Order {code}"))),
        },
    }
}

pub async fn set_notification_sent(
    code: &OrderCode,
    sent: bool,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    let result = sqlx::query(
        "UPDATE orders SET is_sent_callback_notification = $1, version = version + 1, updated_at = $2 WHERE \
         order_code = $3",
    )
    .bind(sent)
    .bind(Utc::now())
    .bind(code.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(SqliteDatabaseError::NotFound(format!("Order {code}")));
    }
    trace!("🗃️ Notification flag for {code} set to {sent}");
    Ok(())
}

pub async fn count_pending_notifications(
    conn: &mut SqliteConnection,
) -> Result<PendingNotificationCounts, SqliteDatabaseError> {
    let rows: Vec<(OrderType, i64)> = sqlx::query_as(
        r#"
        SELECT order_type, COUNT(*) FROM orders
        WHERE status IN ('completed', 'failed', 'canceled')
          AND is_sent_callback_notification = 0
          AND callback_url IS NOT NULL AND TRIM(callback_url) <> ''
        GROUP BY order_type
        "#,
    )
    .fetch_all(conn)
    .await?;
    let mut counts = PendingNotificationCounts::default();
    for (order_type, count) in rows {
        counts.add(order_type, u64::try_from(count).unwrap_or_default());
    }
    Ok(counts)
}
