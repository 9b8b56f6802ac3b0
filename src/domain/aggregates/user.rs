//! User identity as the return workflow sees it

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::string_enum;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User { pub id: Uuid, pub role: Role }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role { #[default] Customer, Admin }

string_enum!(Role { Customer => "customer", Admin => "admin" });

impl User {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}
