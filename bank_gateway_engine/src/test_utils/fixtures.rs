use bgw_common::{Amount, Secret};

use crate::{
    db_types::{
        AssignedUser,
        BankAccount,
        Merchant,
        NewBankAccount,
        NewBankTransaction,
        NewMerchant,
        NewOrder,
        Order,
        OrderCode,
        OrderType,
        UserId,
    },
    traits::{OrderStore, StoreError},
};

pub const TEST_ACCOUNT_NUMBER: &str = "0123456789";
pub const TEST_PORTAL: &str = "test-portal";
pub const TEST_CALLBACK_URL: &str = "https://merchant.example/callback";
pub const TEST_API_KEY: &str = "merchant-secret-key";

/// The merchant and receiving bank account every test order belongs to.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub merchant: Merchant,
    pub account: BankAccount,
}

impl Fixture {
    pub fn new_order(&self, code: &str, order_type: OrderType, amount: i64) -> NewOrder {
        NewOrder::new(OrderCode::from(code), order_type, Amount::from(amount), self.merchant.id)
            .with_merchant_order_id(format!("M-{code}"))
            .with_callback_url(TEST_CALLBACK_URL)
            .with_bank_account(&self.account)
    }

    pub async fn create_order<B: OrderStore>(
        &self,
        store: &B,
        code: &str,
        order_type: OrderType,
        amount: i64,
    ) -> Result<Order, StoreError> {
        store.insert_order(self.new_order(code, order_type, amount)).await
    }
}

/// Inserts a merchant and an active bank account.
pub async fn seed_store<B: OrderStore>(store: &B) -> Result<Fixture, StoreError> {
    let merchant = store
        .insert_merchant(NewMerchant {
            name: "test-merchant".into(),
            display_name: Some("Test Merchant".into()),
            api_key: Secret::new(TEST_API_KEY.to_string()),
        })
        .await?;
    let mut account = NewBankAccount::new("VCB", TEST_ACCOUNT_NUMBER, "NGUYEN VAN A");
    account.assigned_user = Some(AssignedUser::Resolved(UserId(7)));
    let account = store.insert_bank_account(account).await?;
    Ok(Fixture { merchant, account })
}

/// A credit to the test account from the test portal.
pub fn bank_tx(portal_transaction_id: &str, amount: f64, description: &str) -> NewBankTransaction {
    NewBankTransaction::new(TEST_PORTAL, portal_transaction_id, amount, description, TEST_ACCOUNT_NUMBER)
}
