//! Aggregates module

/// String form of a closed status enum, as persisted and as sent on the wire.
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str { match self { $(Self::$variant => $s),+ } }
        }
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
        }
        impl std::str::FromStr for $ty {
            type Err = crate::domain::aggregates::UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s { $($s => Ok(Self::$variant),)+ other => Err(crate::domain::aggregates::UnknownVariant(other.to_string())) }
            }
        }
    };
}
pub(crate) use string_enum;

pub mod product;
pub mod order;
pub mod return_order;
pub mod user;
pub mod voucher;

pub use product::{ColorVariant, Product, SizeStock};
pub use order::{ItemStatus, LineItem, Order, OrderStatus};
pub use return_order::{ReturnDraft, ReturnError, ReturnItem, ReturnOrder, ReturnStatus, ReturnType, RequestedItem};
pub use user::{Role, User};
pub use voucher::{Voucher, VoucherRejection, VoucherType};

#[derive(Debug, Clone, PartialEq, Eq)] pub struct UnknownVariant(pub String);
impl std::error::Error for UnknownVariant {}
impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Unknown value: {}", self.0) }
}
