//! Default fruit pool installed the first time a guild is used.

use crate::crew::types::{FruitDefinition, FruitType};

/// Stock given to each seeded shop entry.
pub const SEED_STOCK: Option<u32> = Some(1);

const DEFAULT_POOL: &[(&str, FruitType, i64, &str)] = &[
    ("Gomu Gomu no Mi", FruitType::Paramecia, 8, "Rubber body that shrugs off blunt hits"),
    ("Bara Bara no Mi", FruitType::Paramecia, 5, "Split the body into floating pieces"),
    ("Ope Ope no Mi", FruitType::Paramecia, 14, "Room: rearrange anything inside it"),
    ("Gura Gura no Mi", FruitType::Paramecia, 20, "Quake strikes that crack the air"),
    ("Ushi Ushi no Mi, Model: Bison", FruitType::Zoan, 6, "Charging bison form"),
    ("Neko Neko no Mi, Model: Leopard", FruitType::Zoan, 10, "Leopard hybrid speed"),
    ("Ryu Ryu no Mi, Model: Allosaurus", FruitType::AncientZoan, 13, "Allosaurus jaws"),
    ("Ryu Ryu no Mi, Model: Pteranodon", FruitType::AncientZoan, 11, "Pteranodon dives"),
    ("Mera Mera no Mi", FruitType::Logia, 15, "Fire fist"),
    ("Hie Hie no Mi", FruitType::Logia, 14, "Freezes everything it touches"),
    ("Goro Goro no Mi", FruitType::Logia, 18, "Lightning judgement"),
    ("Tori Tori no Mi, Model: Phoenix", FruitType::MythicalZoan, 17, "Blue flames of regeneration"),
    ("Uo Uo no Mi, Model: Seiryu", FruitType::MythicalZoan, 22, "Azure dragon breath"),
];

/// Unpriced definitions of the default pool.
pub fn default_pool() -> Vec<FruitDefinition> {
    DEFAULT_POOL
        .iter()
        .map(|(name, kind, bonus, ability)| FruitDefinition::new(name, *kind, *bonus, ability))
        .collect()
}
