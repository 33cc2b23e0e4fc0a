mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crewbattles::crew::{
    CrewBattles, CrewError, CrewStoreBuilder, Economy, EconomyError, EconomyPort,
    FileBankLedger, GuildId, LocalLedger, PlayerId,
};

fn bank_service(dir: &tempfile::TempDir, bank: &std::path::Path) -> CrewBattles {
    let store = Arc::new(
        CrewStoreBuilder::new(dir.path().join("db"))
            .open()
            .expect("store"),
    );
    let economy = Economy::with_primary(
        Box::new(FileBankLedger::new(bank)),
        LocalLedger::new(Arc::clone(&store)),
    );
    CrewBattles::new(store, economy, common::quiet_config()).with_seed(7)
}

/// In-memory bank that rejects every operation for one account.
struct FrozenAccountBank {
    frozen: PlayerId,
    balances: Mutex<HashMap<PlayerId, i64>>,
}

impl EconomyPort for FrozenAccountBank {
    fn name(&self) -> &'static str {
        "frozen-account bank"
    }

    fn balance(&self, _guild_id: GuildId, player_id: PlayerId) -> Result<i64, EconomyError> {
        if player_id == self.frozen {
            return Err(EconomyError::Backend("account frozen".into()));
        }
        Ok(*self.balances.lock().unwrap().get(&player_id).unwrap_or(&0))
    }

    fn adjust(
        &self,
        _guild_id: GuildId,
        player_id: PlayerId,
        delta: i64,
        _reason: &str,
    ) -> Result<bool, EconomyError> {
        if player_id == self.frozen {
            return Err(EconomyError::Backend("account frozen".into()));
        }
        *self.balances.lock().unwrap().entry(player_id).or_insert(0) += delta;
        Ok(true)
    }
}

fn bank_balance(path: &std::path::Path, key: &str) -> Option<i64> {
    let raw = std::fs::read_to_string(path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    value["accounts"][key].as_i64()
}

#[test]
fn missing_bank_file_falls_back_to_local_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let bank = tmp.path().join("absent").join("bank.json");
    let crew = bank_service(&tmp, &bank);

    let report = crew.start(1, 10, Utc::now()).unwrap();
    assert!(report.reward_failure.is_none());
    assert_eq!(crew.economy().local().balance(1, 10).unwrap(), 1_000);
    assert_eq!(crew.balance(1, 10).unwrap(), 1_000);

    let trail = crew.economy().local().transactions(1, 10).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].delta, 1_000);
    assert_eq!(trail[0].reason, "starting beri");
    assert!(!bank.exists());
}

#[test]
fn reachable_bank_file_is_the_primary_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let bank = tmp.path().join("bank.json");
    std::fs::write(&bank, r#"{"accounts":{"1:11":40}}"#).unwrap();
    let crew = bank_service(&tmp, &bank);
    let now = Utc::now();

    crew.start(1, 10, now).unwrap();
    assert_eq!(bank_balance(&bank, "1:10"), Some(1_000));
    assert_eq!(crew.economy().local().balance(1, 10).unwrap(), 0);

    crew.start(1, 11, now).unwrap();
    assert_eq!(crew.balance(1, 11).unwrap(), 1_040);

    crew.train(1, 10, crewbattles::crew::HakiStat::Armament, now)
        .unwrap();
    assert_eq!(bank_balance(&bank, "1:10"), Some(500));
}

#[test]
fn corrupt_bank_file_is_an_error_not_a_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let bank = tmp.path().join("bank.json");
    std::fs::write(&bank, "{ not json").unwrap();
    let crew = bank_service(&tmp, &bank);

    let report = crew.start(1, 10, Utc::now()).unwrap();
    assert!(report.reward_failure.is_some());
    assert!(crew.store().get_player(1, 10).unwrap().started);
    assert_eq!(crew.economy().local().balance(1, 10).unwrap(), 0);
    assert!(matches!(
        crew.balance(1, 10),
        Err(CrewError::Economy(EconomyError::Backend(_)))
    ));
}

#[test]
fn concurrent_debits_never_overdraw_the_local_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(CrewStoreBuilder::new(tmp.path()).open().unwrap());
    let economy = Economy::local_only(LocalLedger::new(Arc::clone(&store)));
    economy.credit(1, 10, 500, "grant").unwrap();

    let successes = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| economy.debit(1, 10, 500, "race").is_ok()))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(successes, 1);
    assert_eq!(economy.balance(1, 10).unwrap(), 0);
    let trail = economy.local().transactions(1, 10).unwrap();
    assert_eq!(trail.iter().filter(|tx| tx.delta == -500).count(), 1);
}

#[test]
fn zero_and_negative_amounts_are_no_ops() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(CrewStoreBuilder::new(tmp.path()).open().unwrap());
    let economy = Economy::local_only(LocalLedger::new(Arc::clone(&store)));

    economy.credit(1, 10, 0, "nothing").unwrap();
    economy.debit(1, 10, 0, "free").unwrap();
    economy.debit(1, 10, -5, "free").unwrap();
    assert_eq!(economy.balance(1, 10).unwrap(), 0);
    assert!(economy.local().transactions(1, 10).unwrap().is_empty());
}

#[tokio::test]
async fn refused_battle_reward_is_reported_and_records_still_saved() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(
        CrewStoreBuilder::new(tmp.path().join("db"))
            .open()
            .unwrap(),
    );
    let bank = FrozenAccountBank {
        frozen: 20,
        balances: Mutex::new(HashMap::new()),
    };
    let economy = Economy::with_primary(Box::new(bank), LocalLedger::new(Arc::clone(&store)));
    let crew = CrewBattles::new(store, economy, common::quiet_config()).with_seed(11);
    let now = Utc::now();
    crew.start(1, 10, now).unwrap();
    // Starting beri is refused for the frozen account, the start itself stands
    assert!(crew.start(1, 20, now).unwrap().reward_failure.is_some());

    let report = crew.challenge(1, 7, 10, 20, now, None).await.unwrap();
    assert_eq!(report.reward_failures.len(), 1);
    let failure = &report.reward_failures[0];
    assert_eq!(failure.player_id, 20);
    let expected = if report.winner_id == 20 {
        report.winner_beri
    } else {
        report.loser_beri
    };
    assert_eq!(failure.amount, expected);
    assert!(failure.error.contains("account frozen"));

    let paid = if report.winner_id == 10 {
        report.winner_beri
    } else {
        report.loser_beri
    };
    assert_eq!(crew.balance(1, 10).unwrap(), 1_000 + paid);
    for player in [10, 20] {
        let record = crew.store().get_player(1, player).unwrap();
        assert_eq!(record.wins + record.losses, 1);
        assert!(record.exp > 0);
    }
    assert!(!crew.guard().is_busy(7));
}

#[tokio::test]
async fn corrupt_bank_file_fails_both_battle_rewards() {
    let tmp = tempfile::tempdir().unwrap();
    let bank = tmp.path().join("bank.json");
    std::fs::write(&bank, "{ not json").unwrap();
    let crew = bank_service(&tmp, &bank);
    let now = Utc::now();
    crew.start(1, 10, now).unwrap();
    crew.start(1, 20, now).unwrap();

    let report = crew.challenge(1, 7, 10, 20, now, None).await.unwrap();
    let mut failed: Vec<_> = report.reward_failures.iter().map(|f| f.player_id).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![10, 20]);
    // No silent fallback onto the local ledger
    assert_eq!(crew.economy().local().balance(1, 10).unwrap(), 0);
    assert_eq!(crew.economy().local().balance(1, 20).unwrap(), 0);
    let winner = crew.store().get_player(1, report.winner_id).unwrap();
    assert_eq!(winner.wins, 1);
    assert!(!crew.guard().is_busy(7));
}

#[test]
fn bank_file_keeps_the_reason_for_a_purchase() {
    let tmp = tempfile::tempdir().unwrap();
    let bank = tmp.path().join("bank.json");
    std::fs::write(&bank, r#"{"accounts":{}}"#).unwrap();
    let crew = bank_service(&tmp, &bank);
    crew.start(1, 10, Utc::now()).unwrap();
    crew.add_fruit(1, "Bara Bara no Mi", "paramecia", 2, "Chop apart", Some(300))
        .unwrap();
    crew.stock_fruit(1, "Bara Bara no Mi", None).unwrap();
    crew.buy(1, 10, "Bara Bara no Mi").unwrap();

    let trail = FileBankLedger::new(&bank).transactions(1, 10).unwrap();
    let reasons: Vec<_> = trail.iter().map(|tx| tx.reason.as_str()).collect();
    assert_eq!(reasons[0], "starting beri");
    let purchase = trail.last().unwrap();
    assert!(purchase.reason.contains("Bara Bara no Mi"), "{:?}", reasons);
    assert_eq!((purchase.delta, purchase.balance_after), (-300, 700));
}
