use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Verification status of a payments account. Only PENDING -> VERIFIED is legal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Pending,
    Verified,
}

impl AccountStatus {
    pub fn can_transition_to(self, next: AccountStatus) -> bool {
        matches!((self, next), (AccountStatus::Pending, AccountStatus::Verified))
    }
}

/// A payments account owned by a box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRecord {
    pub id: String,
    pub box_id: String,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account row to create; always starts PENDING.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct NewAccount {
    #[garde(length(min = 1, max = 128))]
    pub id: String,

    #[garde(length(min = 1, max = 128))]
    pub box_id: String,

    #[garde(length(min = 1, max = 200))]
    pub name: Option<String>,

    #[garde(length(min = 1, max = 64))]
    pub account_type: Option<String>,

    #[garde(skip)]
    pub meta: Option<serde_json::Value>,
}

/// Body of `POST /accounts`. The box id comes from the caller's identity, not the body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterAccountRequest {
    #[garde(length(min = 1, max = 128))]
    pub id: String,

    #[garde(length(min = 1, max = 200))]
    pub name: Option<String>,

    #[garde(length(min = 1, max = 64))]
    pub account_type: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub meta: Option<serde_json::Value>,
}

impl RegisterAccountRequest {
    pub fn into_new_account(self, box_id: String) -> NewAccount {
        NewAccount {
            id: self.id,
            box_id,
            name: self.name,
            account_type: self.account_type,
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        assert!(AccountStatus::Pending.can_transition_to(AccountStatus::Verified));
        assert!(!AccountStatus::Verified.can_transition_to(AccountStatus::Pending));
        assert!(!AccountStatus::Verified.can_transition_to(AccountStatus::Verified));
        assert!(!AccountStatus::Pending.can_transition_to(AccountStatus::Pending));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&AccountStatus::Verified).unwrap();
        assert_eq!(json, "\"VERIFIED\"");
        assert_eq!(AccountStatus::Pending.to_string(), "PENDING");
    }

    #[test]
    fn test_request_validation() {
        let ok = RegisterAccountRequest {
            id: "acct-42".to_string(),
            name: Some("Asha".to_string()),
            account_type: None,
            meta: None,
        };
        assert!(ok.validate().is_ok());

        let empty = RegisterAccountRequest {
            id: String::new(),
            name: None,
            account_type: None,
            meta: None,
        };
        assert!(empty.validate().is_err());
    }
}
