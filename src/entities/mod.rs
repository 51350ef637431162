pub mod prelude;

pub mod claim;
pub mod coupon;
pub mod rotation_cursor;
pub mod user;
