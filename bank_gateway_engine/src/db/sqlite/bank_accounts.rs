use bgw_common::Amount;
use chrono::Utc;
use log::debug;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{AssignedUser, BankAccount, BankAccountRow, NewBankAccount},
    traits::BankAccountQueryFilter,
};

const ACCOUNT_COLUMNS: &str = "id, bank_code, account_number, owner_name, balance, assigned_user_id, \
                               assigned_user_ref, is_active, created_at, updated_at";

pub async fn insert_account(
    account: NewBankAccount,
    conn: &mut SqliteConnection,
) -> Result<BankAccount, SqliteDatabaseError> {
    let (user_id, user_ref) = match account.assigned_user {
        Some(AssignedUser::Resolved(id)) => (Some(id.0), None),
        Some(AssignedUser::Unresolved(r)) => (None, Some(r)),
        None => (None, None),
    };
    let now = Utc::now();
    let sql = format!(
        "INSERT INTO bank_accounts (bank_code, account_number, owner_name, balance, assigned_user_id, \
         assigned_user_ref, is_active, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $7) RETURNING \
         {ACCOUNT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, BankAccountRow>(&sql)
        .bind(account.bank_code)
        .bind(account.account_number)
        .bind(account.owner_name)
        .bind(account.balance)
        .bind(user_id)
        .bind(user_ref)
        .bind(now)
        .fetch_one(conn)
        .await?;
    Ok(row.into())
}

pub async fn fetch_accounts(
    query: &BankAccountQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<BankAccount>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {ACCOUNT_COLUMNS} FROM bank_accounts WHERE 1 = 1"));
    if let Some(id) = query.id {
        builder.push(" AND id = ");
        builder.push_bind(id);
    }
    if let Some(number) = &query.account_number {
        builder.push(" AND account_number = ");
        builder.push_bind(number.clone());
    }
    if query.active_only {
        builder.push(" AND is_active = 1");
    }
    builder.push(" ORDER BY id ASC");
    let rows = builder.build_query_as::<BankAccountRow>().fetch_all(conn).await?;
    Ok(rows.into_iter().map(BankAccount::from).collect())
}

/// A portal-reported closing balance wins over our own running total, since it also reflects movements we never saw.
pub async fn credit_account(
    account_id: i64,
    amount: Amount,
    balance_after: Option<Amount>,
    conn: &mut SqliteConnection,
) -> Result<BankAccount, SqliteDatabaseError> {
    let sql = match balance_after {
        Some(_) => format!("UPDATE bank_accounts SET balance = $1, updated_at = $2 WHERE id = $3 RETURNING {ACCOUNT_COLUMNS}"),
        None => format!(
            "UPDATE bank_accounts SET balance = balance + $1, updated_at = $2 WHERE id = $3 RETURNING {ACCOUNT_COLUMNS}"
        ),
    };
    let row = sqlx::query_as::<_, BankAccountRow>(&sql)
        .bind(balance_after.unwrap_or(amount))
        .bind(Utc::now())
        .bind(account_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| SqliteDatabaseError::NotFound(format!("Bank account #{account_id}")))?;
    debug!("🗃️ Bank account #{account_id} balance is now {}", row.balance);
    Ok(row.into())
}

/// Claims the entry's credit and applies it. Must run inside a transaction so the claim and the balance change land
/// together.
pub async fn credit_account_once(
    entry_id: i64,
    account_id: i64,
    amount: Amount,
    balance_after: Option<Amount>,
    conn: &mut SqliteConnection,
) -> Result<BankAccount, SqliteDatabaseError> {
    let claimed =
        sqlx::query("UPDATE bank_transactions SET is_credited = 1, updated_at = $1 WHERE id = $2 AND is_credited = 0")
            .bind(Utc::now())
            .bind(entry_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    if claimed > 0 {
        return credit_account(account_id, amount, balance_after, conn).await;
    }
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM bank_transactions WHERE id = $1")
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Err(SqliteDatabaseError::NotFound(format!("Bank entry #{entry_id}")));
    }
    debug!("🗃️ Bank entry #{entry_id} was already credited to account #{account_id}");
    let filter = BankAccountQueryFilter::default().with_id(account_id);
    fetch_accounts(&filter, conn)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SqliteDatabaseError::NotFound(format!("Bank account #{account_id}")))
}
