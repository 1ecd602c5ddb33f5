use std::fmt::Debug;

use bgw_common::Amount;
use log::*;
use sqlx::{migrate, SqlitePool};

use super::{bank_accounts, bank_transactions, merchants, new_pool, orders, SqliteDatabaseError};
use crate::{
    db_types::{
        BankAccount,
        BankEntryUpdate,
        BankTransactionEntry,
        Merchant,
        NewBankAccount,
        NewBankEntry,
        NewMerchant,
        NewOrder,
        Order,
        OrderCode,
        OrderUpdate,
    },
    traits::{DocumentQuery, Documents, InsertBankEntryResult, OrderStore, PendingNotificationCounts, StoreError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects to the database at `url`, creating the file if it does not exist yet.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), SqliteDatabaseError> {
        migrate!("./src/db/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Migrations complete for {}", self.url);
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetches a single order by its code, bypassing the document query machinery.
    pub async fn fetch_order(&self, code: &OrderCode) -> Result<Option<Order>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(code, &mut conn).await
    }

    async fn run_query(&self, query: &DocumentQuery) -> Result<Documents, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let docs = match query {
            DocumentQuery::Orders(q) => Documents::Orders(orders::fetch_orders(q, &mut conn).await?),
            DocumentQuery::BankEntries(q) => {
                Documents::BankEntries(bank_transactions::fetch_entries(q, &mut conn).await?)
            },
            DocumentQuery::BankAccounts(q) => {
                Documents::BankAccounts(bank_accounts::fetch_accounts(q, &mut conn).await?)
            },
            DocumentQuery::Merchants(q) => Documents::Merchants(merchants::fetch_merchants(q, &mut conn).await?),
        };
        Ok(docs)
    }
}

impl OrderStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(SqliteDatabaseError::from)?;
        Ok(())
    }

    async fn list_documents(&self, query: &DocumentQuery) -> Result<Documents, StoreError> {
        Ok(self.run_query(query).await?)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(SqliteDatabaseError::from)?;
        Ok(orders::insert_order(order, &mut conn).await?)
    }

    async fn update_order(
        &self,
        code: &OrderCode,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await.map_err(SqliteDatabaseError::from)?;
        let order = orders::update_order(code, expected_version, update, &mut tx).await?;
        tx.commit().await.map_err(SqliteDatabaseError::from)?;
        Ok(order)
    }

    async fn set_notification_sent(&self, code: &OrderCode, sent: bool) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(SqliteDatabaseError::from)?;
        Ok(orders::set_notification_sent(code, sent, &mut conn).await?)
    }

    async fn insert_bank_entry(&self, entry: NewBankEntry) -> Result<InsertBankEntryResult, StoreError> {
        let mut tx = self.pool.begin().await.map_err(SqliteDatabaseError::from)?;
        let result = bank_transactions::idempotent_insert(entry, &mut tx).await?;
        tx.commit().await.map_err(SqliteDatabaseError::from)?;
        Ok(result)
    }

    async fn update_bank_entry(&self, id: i64, update: BankEntryUpdate) -> Result<BankTransactionEntry, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(SqliteDatabaseError::from)?;
        Ok(bank_transactions::update_entry(id, update, &mut conn).await?)
    }

    async fn credit_bank_account(
        &self,
        entry_id: i64,
        account_id: i64,
        amount: Amount,
        balance_after: Option<Amount>,
    ) -> Result<BankAccount, StoreError> {
        let mut tx = self.pool.begin().await.map_err(SqliteDatabaseError::from)?;
        let account = bank_accounts::credit_account_once(entry_id, account_id, amount, balance_after, &mut tx).await?;
        tx.commit().await.map_err(SqliteDatabaseError::from)?;
        Ok(account)
    }

    async fn insert_bank_account(&self, account: NewBankAccount) -> Result<BankAccount, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(SqliteDatabaseError::from)?;
        Ok(bank_accounts::insert_account(account, &mut conn).await?)
    }

    async fn insert_merchant(&self, merchant: NewMerchant) -> Result<Merchant, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(SqliteDatabaseError::from)?;
        Ok(merchants::insert_merchant(merchant, &mut conn).await?)
    }

    async fn count_pending_notifications(&self) -> Result<PendingNotificationCounts, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(SqliteDatabaseError::from)?;
        Ok(orders::count_pending_notifications(&mut conn).await?)
    }
}
