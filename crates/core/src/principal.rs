//! Authenticated principals: an account name plus the roles it may assume.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated catalogue user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    account: String,
    roles: Vec<String>,
}

impl Principal {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(account: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            account: account.into(),
            roles,
        }
    }

    /// The account name this principal authenticated as.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Roles this principal may act under, in declaration order.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// The group new entries are stamped with: the first declared role,
    /// falling back to the account name itself.
    pub fn default_group(&self) -> &str {
        self.roles.first().map(String::as_str).unwrap_or(&self.account)
    }

    /// Whether this principal can act as `account`: either it is that
    /// account, or the account is among its assumable roles.
    pub fn can_become(&self, account: &str) -> bool {
        self.account == account || self.roles.iter().any(|r| r == account)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.account)
    }
}
