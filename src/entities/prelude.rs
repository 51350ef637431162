#![allow(unused_imports)]

pub use super::claim::Entity as Claim;
pub use super::coupon::Entity as Coupon;
pub use super::rotation_cursor::Entity as RotationCursor;
pub use super::user::Entity as User;
