use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Persisted connection status of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Disconnected,
    Connected,
    LoggedIn,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::LoggedIn => "logged_in",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connected" => Ok(Self::Connected),
            "logged_in" => Ok(Self::LoggedIn),
            other => anyhow::bail!("unknown account status: {other}"),
        }
    }
}

/// A tenant's persisted identity and status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: AccountStatus,
    /// Empty until the first successful login.
    pub phone_number: String,
    /// Empty until the first successful login.
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl Account {
    /// A freshly created, never-connected account.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AccountStatus::Disconnected,
            phone_number: String::new(),
            device_id: String::new(),
            created_at: Utc::now(),
            last_connected: None,
        }
    }

    /// Mark a successful connect/login transition.
    pub fn mark_connected(&mut self, status: AccountStatus) {
        self.status = status;
        self.last_connected = Some(Utc::now());
    }
}

/// Outbound notification target of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
    pub secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_forms_match_serde() {
        for status in [
            AccountStatus::Disconnected,
            AccountStatus::Connected,
            AccountStatus::LoggedIn,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(status.as_str().parse::<AccountStatus>().unwrap(), status);
        }
        assert!("paired".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn new_account_starts_disconnected_and_empty() {
        let account = Account::new("acct1");
        assert_eq!(account.status, AccountStatus::Disconnected);
        assert!(account.phone_number.is_empty());
        assert!(account.device_id.is_empty());
        assert!(account.last_connected.is_none());
    }

    #[test]
    fn mark_connected_stamps_last_connected() {
        let mut account = Account::new("acct1");
        account.mark_connected(AccountStatus::LoggedIn);
        assert_eq!(account.status, AccountStatus::LoggedIn);
        assert!(account.last_connected.is_some());
    }
}
