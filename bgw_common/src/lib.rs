mod amount;
pub mod helpers;
pub mod op;
mod secret;

pub use amount::{Amount, AmountConversionError, CURRENCY_CODE};
pub use secret::Secret;
