//! Test fixtures shared by the integration tests.

use std::sync::Arc;

use crewbattles::crew::{CrewBattles, CrewStoreBuilder, Economy, GuildEconomyConfig, LocalLedger};

/// Guild settings for tests: no pauses between turns and no starter fruit.
pub fn quiet_config() -> GuildEconomyConfig {
    GuildEconomyConfig {
        turn_delay_ms: 0,
        starter_fruit_chance: 0.0,
        ..GuildEconomyConfig::default()
    }
}

/// Local-ledger service over a fresh store in `dir`, seeded for reproducible battles.
#[allow(dead_code)]
pub fn service(dir: &tempfile::TempDir) -> CrewBattles {
    service_with(dir, quiet_config())
}

#[allow(dead_code)] // Not every test binary uses every fixture.
pub fn service_with(dir: &tempfile::TempDir, defaults: GuildEconomyConfig) -> CrewBattles {
    let store = Arc::new(
        CrewStoreBuilder::new(dir.path().join("db"))
            .open()
            .expect("store"),
    );
    let economy = Economy::local_only(LocalLedger::new(Arc::clone(&store)));
    CrewBattles::new(store, economy, defaults).with_seed(42)
}
