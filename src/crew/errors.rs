use chrono::Duration;
use thiserror::Error;

/// Errors raised by the persistence layer. These are never expected during normal
/// play and always propagate to the top-level handler.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization errors (ledger accounts and audit log).
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around JSON document encoding errors.
    #[error("document error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, snapshot files, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a document written by a newer build.
    #[error("schema mismatch for {entity}: expected at most {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Snapshot checksum did not match its payload.
    #[error("snapshot checksum mismatch: expected {expected}, got {found}")]
    ChecksumMismatch { expected: String, found: String },

    /// Snapshot decoded but its documents contradict each other.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures of an economy backend.
#[derive(Debug, Error)]
pub enum EconomyError {
    /// The backend cannot be reached; callers fall back to the local ledger.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the operation failed.
    #[error("ledger failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a gated operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockReason {
    /// Conqueror haki has not been unlocked yet.
    ConquerorLocked,
    /// The player's level is below the requirement.
    LevelTooLow { required: u32, level: u32 },
    /// The stat is already at its ceiling.
    MaxedOut,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockReason::ConquerorLocked => write!(f, "conqueror haki is locked"),
            LockReason::LevelTooLow { required, level } => {
                write!(f, "requires level {} (currently {})", required, level)
            }
            LockReason::MaxedOut => write!(f, "stat is already maxed"),
        }
    }
}

/// Outcome of every gameplay operation that does not succeed. All variants except
/// `Storage` and `Economy` are expected conditions for the caller to render.
#[derive(Debug, Error)]
pub enum CrewError {
    #[error("player has not started a character")]
    NotStarted,

    #[error("player has already started a character")]
    AlreadyStarted,

    #[error("a fruit is already equipped: {0}")]
    AlreadyEquipped(String),

    #[error("no fruit equipped")]
    NotEquipped,

    #[error("fruit not sold in the shop: {0}")]
    NotStocked(String),

    #[error("fruit out of stock: {0}")]
    OutOfStock(String),

    #[error("fruit not in the pool: {0}")]
    UnknownFruit(String),

    #[error("insufficient funds: need {needed}, have {balance}")]
    InsufficientFunds { needed: i64, balance: i64 },

    #[error("on cooldown for another {}s", .remaining.num_seconds())]
    OnCooldown { remaining: Duration },

    #[error("locked: {0}")]
    Locked(LockReason),

    #[error("conqueror haki already unlocked")]
    AlreadyUnlocked,

    #[error("a battle is already running in channel {0}")]
    AlreadyInBattle(u64),

    #[error("a player cannot challenge themselves")]
    SelfChallenge,

    #[error(transparent)]
    Economy(#[from] EconomyError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sled::Error> for CrewError {
    fn from(err: sled::Error) -> Self {
        CrewError::Storage(StorageError::Sled(err))
    }
}

impl CrewError {
    /// True for conditions the command surface renders as plain feedback.
    pub fn is_expected(&self) -> bool {
        !matches!(self, CrewError::Storage(_) | CrewError::Economy(_))
    }
}
