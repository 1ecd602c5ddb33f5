pub mod delivery_api;
pub mod errors;
pub mod expiry_api;
pub mod objects;
pub mod order_status_api;
pub mod reconciliation_api;
