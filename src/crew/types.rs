use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PLAYER_SCHEMA_VERSION: u8 = 2;
pub const GUILD_SCHEMA_VERSION: u8 = 2;

pub const MAX_LEVEL: u32 = 100;
pub const HAKI_MAX: u32 = 100;
pub const CONQUEROR_UNLOCK_LEVEL: u32 = 10;

pub type GuildId = u64;
pub type PlayerId = u64;
pub type ChannelId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HakiStat {
    Armament,
    Observation,
    Conqueror,
}

impl HakiStat {
    pub const ALL: [HakiStat; 3] = [HakiStat::Armament, HakiStat::Observation, HakiStat::Conqueror];

    pub fn as_str(&self) -> &'static str {
        match self {
            HakiStat::Armament => "armament",
            HakiStat::Observation => "observation",
            HakiStat::Conqueror => "conqueror",
        }
    }

    /// Parse a stat name as typed by players ("arm", "Observation", "coc", ...).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "armament" | "arm" | "busoshoku" => Some(HakiStat::Armament),
            "observation" | "obs" | "kenbunshoku" => Some(HakiStat::Observation),
            "conqueror" | "conquerors" | "conqueror's" | "coc" | "haoshoku" => {
                Some(HakiStat::Conqueror)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for HakiStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HakiStats {
    #[serde(default)]
    pub armament: u32,
    #[serde(default)]
    pub observation: u32,
    #[serde(default)]
    pub conqueror: u32,
    #[serde(default)]
    pub conqueror_unlocked: bool,
}

impl HakiStats {
    pub fn get(&self, stat: HakiStat) -> u32 {
        match stat {
            HakiStat::Armament => self.armament,
            HakiStat::Observation => self.observation,
            HakiStat::Conqueror => self.conqueror,
        }
    }

    pub fn get_mut(&mut self, stat: HakiStat) -> &mut u32 {
        match stat {
            HakiStat::Armament => &mut self.armament,
            HakiStat::Observation => &mut self.observation,
            HakiStat::Conqueror => &mut self.conqueror,
        }
    }
}

/// Persistent per-(guild, player) document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    #[serde(default)]
    pub started: bool,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub exp: u64,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    /// Name of the equipped fruit, if any
    #[serde(default)]
    pub fruit: Option<String>,
    #[serde(default)]
    pub haki: HakiStats,
    /// Last successful training per stat
    #[serde(default)]
    pub last_haki_train_at: BTreeMap<HakiStat, DateTime<Utc>>,
    #[serde(default)]
    pub battle_cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub schema_version: u8,
}

fn default_level() -> u32 {
    1
}

impl Default for PlayerRecord {
    fn default() -> Self {
        Self {
            started: false,
            level: 1,
            exp: 0,
            wins: 0,
            losses: 0,
            fruit: None,
            haki: HakiStats::default(),
            last_haki_train_at: BTreeMap::new(),
            battle_cooldown_until: None,
            created_at: None,
            updated_at: None,
            schema_version: PLAYER_SCHEMA_VERSION,
        }
    }
}

impl PlayerRecord {
    /// A freshly started character.
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            started: true,
            created_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Remaining battle cooldown at `now`, if any.
    pub fn battle_cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.battle_cooldown_until
            .map(|until| until - now)
            .filter(|remaining| *remaining > Duration::zero())
    }
}

/// Fixed fruit taxonomy. Stored and accepted through [`FruitType::normalize`], so
/// documents written with loose spellings ("Mythic Zoan") load cleanly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub enum FruitType {
    Paramecia,
    Zoan,
    AncientZoan,
    Logia,
    MythicalZoan,
}

impl FruitType {
    pub const ALL: [FruitType; 5] = [
        FruitType::Paramecia,
        FruitType::Zoan,
        FruitType::AncientZoan,
        FruitType::Logia,
        FruitType::MythicalZoan,
    ];

    /// Canonical key used in price rule tables.
    pub fn key(&self) -> &'static str {
        match self {
            FruitType::Paramecia => "paramecia",
            FruitType::Zoan => "zoan",
            FruitType::AncientZoan => "ancient_zoan",
            FruitType::Logia => "logia",
            FruitType::MythicalZoan => "mythical_zoan",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FruitType::Paramecia => "Paramecia",
            FruitType::Zoan => "Zoan",
            FruitType::AncientZoan => "Ancient Zoan",
            FruitType::Logia => "Logia",
            FruitType::MythicalZoan => "Mythical Zoan",
        }
    }

    /// Map free-form type text through the alias table. Unknown text lands in the
    /// paramecia bucket.
    pub fn normalize(input: &str) -> Self {
        let folded: String = input
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == '_' { ' ' } else { c })
            .collect();
        let folded = folded.split_whitespace().collect::<Vec<_>>().join(" ");
        match folded.as_str() {
            "paramecia" => FruitType::Paramecia,
            "zoan" => FruitType::Zoan,
            "ancient zoan" | "ancient" => FruitType::AncientZoan,
            "logia" => FruitType::Logia,
            "mythical zoan" | "mythic zoan" | "mythical" | "mythic" => FruitType::MythicalZoan,
            _ => FruitType::Paramecia,
        }
    }
}

impl From<String> for FruitType {
    fn from(value: String) -> Self {
        FruitType::normalize(&value)
    }
}

impl From<FruitType> for String {
    fn from(value: FruitType) -> Self {
        value.key().to_string()
    }
}

impl std::fmt::Display for FruitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Catalog ("pool") entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FruitDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FruitType,
    #[serde(default)]
    pub bonus: i64,
    #[serde(default)]
    pub price: i64,
    /// Set by an explicit admin price; skipped by non-forced repricing
    #[serde(default)]
    pub price_locked: bool,
    #[serde(default)]
    pub ability: String,
}

impl FruitDefinition {
    pub fn new(name: &str, kind: FruitType, bonus: i64, ability: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            kind,
            bonus,
            price: 0,
            price_locked: false,
            ability: ability.to_string(),
        }
    }

    /// Case-insensitive identity used for storage keys.
    pub fn key(&self) -> String {
        fruit_key(&self.name)
    }
}

pub fn fruit_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Purchasable shop listing referencing a pool fruit by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShopEntry {
    pub name: String,
    /// Current quantity in stock (None = unlimited)
    #[serde(default)]
    pub stock: Option<u32>,
}

/// Per-type pricing rule, clamped into `[min, max]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRules {
    pub min: i64,
    pub max: i64,
    #[serde(default)]
    pub base: BTreeMap<String, i64>,
    #[serde(default)]
    pub per_bonus: BTreeMap<String, i64>,
}

impl Default for PriceRules {
    fn default() -> Self {
        let table = |values: [i64; 5]| -> BTreeMap<String, i64> {
            FruitType::ALL
                .iter()
                .zip(values)
                .map(|(kind, value)| (kind.key().to_string(), value))
                .collect()
        };
        Self {
            min: 5_000,
            max: 75_000,
            base: table([8_000, 9_000, 14_000, 18_000, 25_000]),
            per_bonus: table([400, 450, 550, 650, 800]),
        }
    }
}

/// Inclusive random range used for battle rewards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardRange {
    pub min: u64,
    pub max: u64,
}

impl RewardRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Tolerates swapped bounds from hand-edited configs.
    pub fn roll<R: Rng>(&self, rng: &mut R) -> u64 {
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        rng.gen_range(lo..=hi)
    }
}

/// Per-guild economy and balance settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildEconomyConfig {
    #[serde(default)]
    pub price_rules: PriceRules,
    /// Shared per-point haki cost
    #[serde(default = "default_haki_cost")]
    pub haki_cost: i64,
    /// Per-stat overrides keyed by stat name
    #[serde(default)]
    pub haki_costs: BTreeMap<String, i64>,
    #[serde(default = "default_haki_cooldown_secs")]
    pub haki_cooldown_secs: i64,
    #[serde(default = "default_winner_exp")]
    pub winner_exp: RewardRange,
    #[serde(default = "default_loser_exp")]
    pub loser_exp: RewardRange,
    #[serde(default = "default_winner_beri")]
    pub winner_beri: i64,
    #[serde(default = "default_loser_beri")]
    pub loser_beri: i64,
    #[serde(default = "default_conqueror_unlock_cost")]
    pub conqueror_unlock_cost: i64,
    /// 0 disables the post-battle cooldown
    #[serde(default)]
    pub battle_cooldown_secs: i64,
    #[serde(default = "default_turn_delay_ms")]
    pub turn_delay_ms: u64,
    #[serde(default = "default_starter_fruit_chance")]
    pub starter_fruit_chance: f64,
    #[serde(default = "default_starting_beri")]
    pub starting_beri: i64,
    #[serde(default)]
    pub schema_version: u8,
}

fn default_haki_cost() -> i64 {
    500
}
fn default_haki_cooldown_secs() -> i64 {
    3_600
}
fn default_winner_exp() -> RewardRange {
    RewardRange::new(40, 70)
}
fn default_loser_exp() -> RewardRange {
    RewardRange::new(10, 25)
}
fn default_winner_beri() -> i64 {
    500
}
fn default_loser_beri() -> i64 {
    100
}
fn default_conqueror_unlock_cost() -> i64 {
    25_000
}
fn default_turn_delay_ms() -> u64 {
    1_500
}
fn default_starter_fruit_chance() -> f64 {
    0.05
}
fn default_starting_beri() -> i64 {
    1_000
}

impl Default for GuildEconomyConfig {
    fn default() -> Self {
        Self {
            price_rules: PriceRules::default(),
            haki_cost: default_haki_cost(),
            haki_costs: BTreeMap::new(),
            haki_cooldown_secs: default_haki_cooldown_secs(),
            winner_exp: default_winner_exp(),
            loser_exp: default_loser_exp(),
            winner_beri: default_winner_beri(),
            loser_beri: default_loser_beri(),
            conqueror_unlock_cost: default_conqueror_unlock_cost(),
            battle_cooldown_secs: 0,
            turn_delay_ms: default_turn_delay_ms(),
            starter_fruit_chance: default_starter_fruit_chance(),
            starting_beri: default_starting_beri(),
            schema_version: GUILD_SCHEMA_VERSION,
        }
    }
}

impl GuildEconomyConfig {
    /// Per-point cost for `stat`, falling back to the shared cost.
    pub fn haki_cost_for(&self, stat: HakiStat) -> i64 {
        self.haki_costs
            .get(stat.as_str())
            .copied()
            .unwrap_or(self.haki_cost)
    }

    pub fn haki_cooldown(&self) -> Duration {
        Duration::seconds(self.haki_cooldown_secs.max(0))
    }

    pub fn battle_cooldown(&self) -> Option<Duration> {
        (self.battle_cooldown_secs > 0).then(|| Duration::seconds(self.battle_cooldown_secs))
    }
}
