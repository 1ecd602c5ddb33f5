use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{Merchant, MerchantRow, NewMerchant},
    traits::MerchantQueryFilter,
};

pub async fn insert_merchant(
    merchant: NewMerchant,
    conn: &mut SqliteConnection,
) -> Result<Merchant, SqliteDatabaseError> {
    let row = sqlx::query_as::<_, MerchantRow>(
        "INSERT INTO merchants (name, display_name, api_key, created_at) VALUES ($1, $2, $3, $4) RETURNING id, name, \
         display_name, api_key, created_at",
    )
    .bind(merchant.name)
    .bind(merchant.display_name)
    .bind(merchant.api_key.reveal().as_str())
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(row.into())
}

pub async fn fetch_merchants(
    query: &MerchantQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<Merchant>, SqliteDatabaseError> {
    let rows = match query.id {
        Some(id) => {
            sqlx::query_as::<_, MerchantRow>(
                "SELECT id, name, display_name, api_key, created_at FROM merchants WHERE id = $1",
            )
            .bind(id)
            .fetch_all(conn)
            .await?
        },
        None => {
            sqlx::query_as::<_, MerchantRow>("SELECT id, name, display_name, api_key, created_at FROM merchants ORDER BY id")
                .fetch_all(conn)
                .await?
        },
    };
    Ok(rows.into_iter().map(Merchant::from).collect())
}
