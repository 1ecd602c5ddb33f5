mod order_code;

pub use order_code::extract_order_code;
