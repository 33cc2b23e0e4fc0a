//! Beri economy boundary.
//!
//! The game core talks to currency through [`EconomyPort`] only. Two adapters exist:
//!
//! - [`FileBankLedger`] - the shared bank file other services write to. A missing or
//!   unreadable file reports [`EconomyError::Unavailable`].
//! - [`LocalLedger`] - balances kept in the Crew Battles store with an audit trail.
//!
//! [`Economy`] composes them: the primary ledger (if configured) is tried first and
//! the local ledger takes over whenever the primary is unavailable. Debits check the
//! balance before adjusting; the two calls are not atomic.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::crew::errors::{CrewError, EconomyError};
use crate::crew::storage::{CrewStore, LedgerTransaction};
use crate::crew::types::{GuildId, PlayerId};

/// Currency backend contract.
pub trait EconomyPort: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn balance(&self, guild_id: GuildId, player_id: PlayerId) -> Result<i64, EconomyError>;

    /// Apply `delta` to the player's balance. `Ok(false)` means the backend refused
    /// (for example the debit would overdraw). `reason` is stored for auditing.
    fn adjust(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        delta: i64,
        reason: &str,
    ) -> Result<bool, EconomyError>;
}

// ============================================================================
// Local ledger
// ============================================================================

/// Fallback ledger stored next to the player documents.
pub struct LocalLedger {
    store: Arc<CrewStore>,
}

impl LocalLedger {
    pub fn new(store: Arc<CrewStore>) -> Self {
        Self { store }
    }

    /// Audit trail for one player, oldest first.
    pub fn transactions(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
    ) -> Result<Vec<LedgerTransaction>, EconomyError> {
        Ok(self.store.ledger_transactions(guild_id, player_id)?)
    }
}

impl EconomyPort for LocalLedger {
    fn name(&self) -> &'static str {
        "local"
    }

    fn balance(&self, guild_id: GuildId, player_id: PlayerId) -> Result<i64, EconomyError> {
        Ok(self.store.ledger_balance(guild_id, player_id)?)
    }

    fn adjust(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        delta: i64,
        reason: &str,
    ) -> Result<bool, EconomyError> {
        let Some(balance_after) = self.store.adjust_ledger_balance(guild_id, player_id, delta)?
        else {
            return Ok(false);
        };
        let tx = LedgerTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            guild_id,
            player_id,
            delta,
            balance_after,
            reason: reason.to_string(),
        };
        self.store.append_ledger_transaction(&tx)?;
        Ok(true)
    }
}

// ============================================================================
// Shared bank file
// ============================================================================

/// On-disk schema of the shared bank file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BankFile {
    /// Balances keyed by `"<guild>:<player>"`
    #[serde(default)]
    pub accounts: HashMap<String, i64>,
    /// Applied adjustments, oldest first
    #[serde(default)]
    pub transactions: Vec<BankTransaction>,
}

/// One applied adjustment in the bank file's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankTransaction {
    pub id: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Same `"<guild>:<player>"` key as `accounts`
    pub account: String,
    pub delta: i64,
    pub balance_after: i64,
    pub reason: String,
}

/// Primary ledger backed by a JSON bank file shared with other services.
/// Access is guarded with fs2 file locks (shared for read, exclusive for write).
pub struct FileBankLedger {
    path: PathBuf,
}

impl FileBankLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn account_key(guild_id: GuildId, player_id: PlayerId) -> String {
        format!("{}:{}", guild_id, player_id)
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> EconomyError {
        EconomyError::Unavailable(format!("{}: {}", self.path.display(), err))
    }

    /// Snapshot of the whole file under a shared lock.
    fn read_bank(&self) -> Result<BankFile, EconomyError> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|e| self.unavailable(e))?;
        file.lock_shared().map_err(|e| self.unavailable(e))?;
        let mut raw = String::new();
        let read = file.read_to_string(&mut raw);
        let _ = file.unlock();
        read.map_err(|e| self.unavailable(e))?;
        self.parse(&raw)
    }

    /// Audit trail of one player, oldest first.
    pub fn transactions(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
    ) -> Result<Vec<BankTransaction>, EconomyError> {
        let account = Self::account_key(guild_id, player_id);
        Ok(self
            .read_bank()?
            .transactions
            .into_iter()
            .filter(|tx| tx.account == account)
            .collect())
    }

    fn parse(&self, raw: &str) -> Result<BankFile, EconomyError> {
        let cleaned = raw.trim_start_matches('\0').trim();
        if cleaned.is_empty() {
            return Ok(BankFile::default());
        }
        serde_json::from_str(cleaned)
            .map_err(|e| EconomyError::Backend(format!("corrupt bank file: {}", e)))
    }
}

impl EconomyPort for FileBankLedger {
    fn name(&self) -> &'static str {
        "bank-file"
    }

    fn balance(&self, guild_id: GuildId, player_id: PlayerId) -> Result<i64, EconomyError> {
        let bank = self.read_bank()?;
        Ok(bank
            .accounts
            .get(&Self::account_key(guild_id, player_id))
            .copied()
            .unwrap_or(0))
    }

    fn adjust(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        delta: i64,
        reason: &str,
    ) -> Result<bool, EconomyError> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.unavailable(e))?;
        file.lock_exclusive().map_err(|e| self.unavailable(e))?;
        let result = (|| -> Result<bool, EconomyError> {
            let mut raw = String::new();
            file.read_to_string(&mut raw)
                .map_err(|e| self.unavailable(e))?;
            let mut bank = self.parse(&raw)?;
            let key = Self::account_key(guild_id, player_id);
            let current = bank.accounts.get(&key).copied().unwrap_or(0);
            let Some(next) = current.checked_add(delta).filter(|next| *next >= 0) else {
                return Ok(false);
            };
            bank.accounts.insert(key.clone(), next);
            bank.transactions.push(BankTransaction {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp_ms: Utc::now().timestamp_millis(),
                account: key,
                delta,
                balance_after: next,
                reason: reason.to_string(),
            });
            let data = serde_json::to_string_pretty(&bank)
                .map_err(|e| EconomyError::Backend(e.to_string()))?;
            file.set_len(0).map_err(|e| self.unavailable(e))?;
            file.seek(SeekFrom::Start(0))
                .map_err(|e| self.unavailable(e))?;
            file.write_all(data.as_bytes())
                .map_err(|e| self.unavailable(e))?;
            file.sync_all().map_err(|e| self.unavailable(e))?;
            debug!(
                "bank-file: {}:{} {:+} -> {} ({})",
                guild_id, player_id, delta, next, reason
            );
            Ok(true)
        })();
        let _ = file.unlock();
        result
    }
}

// ============================================================================
// Composite economy
// ============================================================================

/// Primary-then-local economy used by the game service.
pub struct Economy {
    primary: Option<Box<dyn EconomyPort>>,
    local: LocalLedger,
}

impl Economy {
    pub fn local_only(local: LocalLedger) -> Self {
        Self {
            primary: None,
            local,
        }
    }

    pub fn with_primary(primary: Box<dyn EconomyPort>, local: LocalLedger) -> Self {
        Self {
            primary: Some(primary),
            local,
        }
    }

    pub fn local(&self) -> &LocalLedger {
        &self.local
    }

    fn route<T>(
        &self,
        op: impl Fn(&dyn EconomyPort) -> Result<T, EconomyError>,
    ) -> Result<T, EconomyError> {
        if let Some(primary) = self.primary.as_deref() {
            match op(primary) {
                Err(EconomyError::Unavailable(why)) => {
                    warn!(
                        "{} ledger unavailable ({}); using local ledger",
                        primary.name(),
                        why
                    );
                }
                other => return other,
            }
        }
        op(&self.local)
    }

    /// Charge `amount`, mapping a refusal to [`CrewError::InsufficientFunds`].
    pub fn debit(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        amount: i64,
        reason: &str,
    ) -> Result<(), CrewError> {
        if amount <= 0 {
            return Ok(());
        }
        let balance = self.balance(guild_id, player_id)?;
        if balance < amount {
            return Err(CrewError::InsufficientFunds {
                needed: amount,
                balance,
            });
        }
        if self.route(|port| port.adjust(guild_id, player_id, -amount, reason))? {
            Ok(())
        } else {
            Err(CrewError::InsufficientFunds {
                needed: amount,
                balance,
            })
        }
    }

    /// Pay out `amount`. A refusal from the backend is reported as a backend error.
    pub fn credit(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        amount: i64,
        reason: &str,
    ) -> Result<(), EconomyError> {
        if amount <= 0 {
            return Ok(());
        }
        if self.route(|port| port.adjust(guild_id, player_id, amount, reason))? {
            Ok(())
        } else {
            Err(EconomyError::Backend(format!(
                "credit of {} to {} refused",
                amount, player_id
            )))
        }
    }
}

impl EconomyPort for Economy {
    fn name(&self) -> &'static str {
        "economy"
    }

    fn balance(&self, guild_id: GuildId, player_id: PlayerId) -> Result<i64, EconomyError> {
        self.route(|port| port.balance(guild_id, player_id))
    }

    fn adjust(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        delta: i64,
        reason: &str,
    ) -> Result<bool, EconomyError> {
        if delta < 0 && self.balance(guild_id, player_id)? < delta.saturating_neg() {
            return Ok(false);
        }
        self.route(|port| port.adjust(guild_id, player_id, delta, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::storage::CrewStoreBuilder;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn local_ledger(dir: &TempDir) -> LocalLedger {
        let store = CrewStoreBuilder::new(dir.path().join("db"))
            .open()
            .expect("store");
        LocalLedger::new(Arc::new(store))
    }

    /// Scripted primary that records every call.
    struct ScriptedPort {
        available: bool,
        balance: i64,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedPort {
        fn new(available: bool, balance: i64) -> Self {
            Self {
                available,
                balance,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl EconomyPort for ScriptedPort {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn balance(&self, _guild: GuildId, _player: PlayerId) -> Result<i64, EconomyError> {
            self.calls.lock().unwrap().push("balance".to_string());
            if !self.available {
                return Err(EconomyError::Unavailable("offline".to_string()));
            }
            Ok(self.balance)
        }

        fn adjust(
            &self,
            _guild: GuildId,
            _player: PlayerId,
            delta: i64,
            _reason: &str,
        ) -> Result<bool, EconomyError> {
            self.calls.lock().unwrap().push(format!("adjust {}", delta));
            if !self.available {
                return Err(EconomyError::Unavailable("offline".to_string()));
            }
            Ok(true)
        }
    }

    /// Lets a test keep a handle on the port it hands to `Economy`.
    struct Shared(Arc<ScriptedPort>);

    impl EconomyPort for Shared {
        fn name(&self) -> &'static str {
            "shared"
        }
        fn balance(&self, g: GuildId, p: PlayerId) -> Result<i64, EconomyError> {
            self.0.balance(g, p)
        }
        fn adjust(&self, g: GuildId, p: PlayerId, d: i64, r: &str) -> Result<bool, EconomyError> {
            self.0.adjust(g, p, d, r)
        }
    }

    #[test]
    fn local_ledger_records_audit_trail() {
        let dir = TempDir::new().expect("tempdir");
        let ledger = local_ledger(&dir);
        assert!(ledger.adjust(1, 2, 300, "battle win").unwrap());
        assert!(ledger.adjust(1, 2, -100, "haki training").unwrap());
        assert!(!ledger.adjust(1, 2, -500, "fruit purchase").unwrap());

        let txs = ledger.transactions(1, 2).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].reason, "battle win");
        assert_eq!(txs[1].balance_after, 200);
    }

    #[test]
    fn unavailable_primary_falls_back_to_local() {
        let dir = TempDir::new().expect("tempdir");
        let economy = Economy::with_primary(
            Box::new(ScriptedPort::new(false, 0)),
            local_ledger(&dir),
        );
        economy.credit(1, 2, 250, "grant").unwrap();
        assert_eq!(economy.balance(1, 2).unwrap(), 250);
        assert_eq!(economy.local().balance(1, 2).unwrap(), 250);
        economy.debit(1, 2, 200, "purchase").unwrap();
        assert_eq!(economy.balance(1, 2).unwrap(), 50);
    }

    #[test]
    fn debit_checks_balance_before_adjusting() {
        let dir = TempDir::new().expect("tempdir");
        let primary = Arc::new(ScriptedPort::new(true, 80));
        let economy = Economy::with_primary(Box::new(Shared(primary.clone())), local_ledger(&dir));
        let err = economy.debit(1, 2, 100, "purchase").unwrap_err();
        assert!(matches!(
            err,
            CrewError::InsufficientFunds {
                needed: 100,
                balance: 80
            }
        ));
        assert_eq!(*primary.calls.lock().unwrap(), vec!["balance".to_string()]);

        economy.debit(1, 2, 50, "purchase").unwrap();
        assert_eq!(
            *primary.calls.lock().unwrap(),
            vec![
                "balance".to_string(),
                "balance".to_string(),
                "adjust -50".to_string()
            ]
        );
    }

    #[test]
    fn bank_file_missing_is_unavailable() {
        let dir = TempDir::new().expect("tempdir");
        let bank = FileBankLedger::new(dir.path().join("bank.json"));
        assert!(matches!(
            bank.balance(1, 1),
            Err(EconomyError::Unavailable(_))
        ));
    }

    #[test]
    fn bank_file_adjusts_under_lock() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bank.json");
        fs::write(&path, r#"{"accounts": {"1:2": 1000}}"#).unwrap();
        let bank = FileBankLedger::new(&path);
        assert_eq!(bank.balance(1, 2).unwrap(), 1_000);
        assert!(bank.adjust(1, 2, -400, "purchase").unwrap());
        assert!(!bank.adjust(1, 2, -700, "purchase").unwrap());
        assert!(bank.adjust(1, 3, 25, "reward").unwrap());
        assert_eq!(bank.balance(1, 2).unwrap(), 600);
        assert_eq!(bank.balance(1, 3).unwrap(), 25);

        let saved: BankFile = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.accounts.get("1:2"), Some(&600));
    }

    #[test]
    fn bank_file_keeps_reason_with_each_adjustment() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bank.json");
        fs::write(&path, r#"{"accounts": {"1:2": 100}}"#).unwrap();
        let bank = FileBankLedger::new(&path);
        assert!(bank.adjust(1, 2, -40, "fruit purchase: Mera Mera no Mi").unwrap());
        assert!(!bank.adjust(1, 2, -500, "haki training: armament").unwrap());
        assert!(bank.adjust(1, 3, 10, "battle reward: loss").unwrap());

        let trail = bank.transactions(1, 2).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].reason, "fruit purchase: Mera Mera no Mi");
        assert_eq!(trail[0].delta, -40);
        assert_eq!(trail[0].balance_after, 60);

        // Written into the shared file itself
        let saved: BankFile = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.transactions.len(), 2);
        assert_eq!(saved.transactions[1].account, "1:3");
    }

    #[test]
    fn composite_adjust_checks_balance_before_a_debit() {
        let dir = TempDir::new().expect("tempdir");
        let primary = Arc::new(ScriptedPort::new(true, 80));
        let economy = Economy::with_primary(Box::new(Shared(primary.clone())), local_ledger(&dir));

        assert!(!economy.adjust(1, 2, -100, "purchase").unwrap());
        assert_eq!(*primary.calls.lock().unwrap(), vec!["balance".to_string()]);

        assert!(economy.adjust(1, 2, -80, "purchase").unwrap());
        assert!(economy.adjust(1, 2, 30, "reward").unwrap());
        assert_eq!(
            *primary.calls.lock().unwrap(),
            vec![
                "balance".to_string(),
                "balance".to_string(),
                "adjust -80".to_string(),
                "adjust 30".to_string()
            ]
        );
    }

    #[test]
    fn backend_errors_do_not_fall_back() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bank.json");
        fs::write(&path, "not json").unwrap();
        let economy =
            Economy::with_primary(Box::new(FileBankLedger::new(&path)), local_ledger(&dir));
        assert!(matches!(
            economy.balance(1, 1),
            Err(EconomyError::Backend(_))
        ));
    }
}
