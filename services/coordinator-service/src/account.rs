use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::storage::SnapshotStore;

/// A login usable by scanning devices. Failure state is append-only from the
/// device channel: once an account is flagged it stays flagged until an
/// operator clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub level: u8,
    pub first_warning_timestamp: Option<u64>,
    pub failed: Option<String>,
    pub failed_timestamp: Option<u64>,
    #[serde(default)]
    pub tutorial: u8,
    pub ptc_token: Option<String>,
    /// Device currently holding this account, if any.
    pub device_uuid: Option<String>,
    /// Instance the account last worked, recorded on logout.
    pub last_instance: Option<String>,
    pub last_encounter_lat: Option<f64>,
    pub last_encounter_lon: Option<f64>,
    pub last_encounter_time: Option<u64>,
}

impl Account {
    pub fn new(username: String, password: String, level: u8) -> Self {
        Self {
            username,
            password,
            level,
            first_warning_timestamp: None,
            failed: None,
            failed_timestamp: None,
            tutorial: 0,
            ptc_token: None,
            device_uuid: None,
            last_instance: None,
            last_encounter_lat: None,
            last_encounter_lon: None,
            last_encounter_time: None,
        }
    }

    /// Usable for a device asking for levels in `[min, max]`.
    pub fn eligible(&self, min_level: u8, max_level: u8) -> bool {
        self.level >= min_level
            && self.level <= max_level
            && self.first_warning_timestamp.is_none()
            && self.failed.is_none()
    }
}

/// Account pool backing the device control channel. In-memory map is
/// authoritative; mutations are snapshotted like the device registry.
pub struct AccountPool {
    accounts: RwLock<HashMap<String, Account>>,
    level_cache: RwLock<HashMap<String, u8>>,
    store: Arc<SnapshotStore>,
}

impl AccountPool {
    pub fn new(initial: Vec<Account>, store: Arc<SnapshotStore>) -> Self {
        let accounts = initial
            .into_iter()
            .map(|account| (account.username.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
            level_cache: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub async fn get(&self, username: &str) -> Option<Account> {
        self.accounts.read().await.get(username).cloned()
    }

    pub async fn add_many(&self, accounts: Vec<Account>) -> usize {
        let added = {
            let mut map = self.accounts.write().await;
            let mut added = 0;
            for account in accounts {
                if !map.contains_key(&account.username) {
                    map.insert(account.username.clone(), account);
                    added += 1;
                }
            }
            added
        };
        if added > 0 {
            self.persist().await;
        }
        added
    }

    /// Hand out an unheld, eligible account and bind it to the device.
    pub async fn acquire(&self, min_level: u8, max_level: u8, uuid: &str) -> Option<Account> {
        let acquired = {
            let mut map = self.accounts.write().await;
            let username = map
                .values()
                .find(|a| a.device_uuid.is_none() && a.eligible(min_level, max_level))
                .map(|a| a.username.clone())?;
            let account = map.get_mut(&username).expect("just found");
            account.device_uuid = Some(uuid.to_string());
            account.clone()
        };
        self.persist().await;
        Some(acquired)
    }

    /// Unbind on logout and remember where the account was working.
    pub async fn release(&self, username: &str, instance: Option<&str>) {
        {
            let mut map = self.accounts.write().await;
            let Some(account) = map.get_mut(username) else {
                return;
            };
            account.device_uuid = None;
            if instance.is_some() {
                account.last_instance = instance.map(str::to_string);
            }
        }
        self.persist().await;
    }

    /// Persist a trainer level only when it changed, so the hot ingestion
    /// path does not rewrite the snapshot on every request.
    pub async fn set_level_if_changed(&self, username: &str, level: u8) {
        {
            let cache = self.level_cache.read().await;
            if cache.get(username) == Some(&level) {
                return;
            }
        }
        self.level_cache
            .write()
            .await
            .insert(username.to_string(), level);
        {
            let mut map = self.accounts.write().await;
            if let Some(account) = map.get_mut(username) {
                account.level = level;
            } else {
                debug!(username, level, "level report for unknown account");
                return;
            }
        }
        self.persist().await;
    }

    pub async fn mark_tutorial_done(&self, username: &str) -> bool {
        let found = {
            let mut map = self.accounts.write().await;
            match map.get_mut(username) {
                Some(account) => {
                    if account.level == 0 {
                        account.level = 1;
                    }
                    account.tutorial = 1;
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
        }
        found
    }

    /// Record a terminal failure reason unless one is already present.
    pub async fn mark_failed(&self, username: &str, reason: &str) -> bool {
        let found = {
            let mut map = self.accounts.write().await;
            match map.get_mut(username) {
                Some(account) => {
                    if account.failed.is_none() {
                        account.failed = Some(reason.to_string());
                        account.failed_timestamp = Some(Utc::now().timestamp() as u64);
                    }
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
        }
        found
    }

    /// Record the first warning timestamp, once.
    pub async fn mark_warning(&self, username: &str) -> bool {
        let found = {
            let mut map = self.accounts.write().await;
            match map.get_mut(username) {
                Some(account) => {
                    if account.first_warning_timestamp.is_none() {
                        account.first_warning_timestamp = Some(Utc::now().timestamp() as u64);
                    }
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
        }
        found
    }

    pub async fn has_failed(&self, username: &str) -> bool {
        self.accounts
            .read()
            .await
            .get(username)
            .map(|a| a.failed.is_some())
            .unwrap_or(false)
    }

    /// Spatial cooldown anchor used when the account next logs in elsewhere.
    pub async fn set_cooldown(&self, username: &str, lat: f64, lon: f64) {
        {
            let mut map = self.accounts.write().await;
            let Some(account) = map.get_mut(username) else {
                return;
            };
            account.last_encounter_lat = Some(lat);
            account.last_encounter_lon = Some(lon);
            account.last_encounter_time = Some(Utc::now().timestamp() as u64);
        }
        self.persist().await;
    }

    /// Store a PTC token only when none is present yet.
    pub async fn set_ptc_token(&self, username: &str, token: &str) -> bool {
        let found = {
            let mut map = self.accounts.write().await;
            match map.get_mut(username) {
                Some(account) => {
                    if account.ptc_token.as_deref().unwrap_or("").is_empty() {
                        account.ptc_token = Some(token.to_string());
                    }
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
        }
        found
    }

    async fn persist(&self) {
        let snapshot: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        if let Err(err) = self.store.save_with_retry("accounts", &snapshot).await {
            error!(error = %err, "account snapshot persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pool(accounts: Vec<Account>) -> AccountPool {
        let store = Arc::new(SnapshotStore::new(
            std::env::temp_dir().join(format!("scanmap-{}", Uuid::new_v4())),
        ));
        AccountPool::new(accounts, store)
    }

    #[tokio::test]
    async fn acquire_skips_held_and_flagged_accounts() {
        let mut banned = Account::new("banned".to_string(), "pw".to_string(), 30);
        banned.failed = Some("banned".to_string());
        let mut held = Account::new("held".to_string(), "pw".to_string(), 30);
        held.device_uuid = Some("other".to_string());
        let free = Account::new("free".to_string(), "pw".to_string(), 30);

        let pool = pool(vec![banned, held, free]);
        let got = pool.acquire(0, 40, "dev1").await.unwrap();
        assert_eq!(got.username, "free");
        assert!(pool.acquire(0, 40, "dev2").await.is_none());
    }

    #[tokio::test]
    async fn acquire_respects_level_bounds() {
        let pool = pool(vec![Account::new("low".to_string(), "pw".to_string(), 5)]);
        assert!(pool.acquire(30, 40, "dev").await.is_none());
        assert!(pool.acquire(0, 10, "dev").await.is_some());
    }

    #[tokio::test]
    async fn mark_failed_is_first_writer_wins() {
        let pool = pool(vec![Account::new("a".to_string(), "pw".to_string(), 30)]);
        assert!(pool.mark_failed("a", "banned").await);
        assert!(pool.mark_failed("a", "error_26").await);
        assert_eq!(pool.get("a").await.unwrap().failed.as_deref(), Some("banned"));
    }

    #[tokio::test]
    async fn tutorial_done_bumps_level_zero() {
        let pool = pool(vec![Account::new("a".to_string(), "pw".to_string(), 0)]);
        pool.mark_tutorial_done("a").await;
        let account = pool.get("a").await.unwrap();
        assert_eq!(account.level, 1);
        assert_eq!(account.tutorial, 1);
    }

    #[tokio::test]
    async fn ptc_token_is_set_once() {
        let pool = pool(vec![Account::new("a".to_string(), "pw".to_string(), 30)]);
        pool.set_ptc_token("a", "tok1").await;
        pool.set_ptc_token("a", "tok2").await;
        assert_eq!(pool.get("a").await.unwrap().ptc_token.as_deref(), Some("tok1"));
    }
}
