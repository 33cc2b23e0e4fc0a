//! Binary entrypoint for the Crew Battles maintenance CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `status` - print database location and per-guild summaries
//! - `export --guild <id> --output <file>` - write a checksummed snapshot of one guild
//! - `import --guild <id> --input <file>` - replace one guild's documents from a snapshot
//! - `reset-player --guild <id> --player <id>` - delete one player record
//! - `reset-started --guild <id>` - give every started player a fresh record
//! - `wipe --guild <id> --yes` - delete every document of a guild
//! - `reprice --guild <id> [--force]` - recompute fruit prices from the guild rules
//! - `simulate [--count N] ...` - run offline battles and print win rates
//!
//! See the library crate docs for module-level details: `crewbattles::`.
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crewbattles::config::Config;
use crewbattles::crew::{simulate, Combatant, CrewBattles, Side};

#[derive(Parser)]
#[command(name = "crewbattles")]
#[command(about = "Maintenance tools for the Crew Battles game core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Show database status
    Status,
    /// Export one guild to a gzip snapshot
    Export {
        #[arg(short, long)]
        guild: u64,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Replace one guild's documents from a snapshot
    Import {
        #[arg(short, long)]
        guild: u64,
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Delete one player's record
    ResetPlayer {
        #[arg(short, long)]
        guild: u64,
        #[arg(short, long)]
        player: u64,
    },
    /// Reset every started player of a guild to a fresh character
    ResetStarted {
        #[arg(short, long)]
        guild: u64,
    },
    /// Delete all players, ledger balances, fruits and config of a guild
    Wipe {
        #[arg(short, long)]
        guild: u64,
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Recompute fruit prices
    Reprice {
        #[arg(short, long)]
        guild: u64,
        /// Also recompute admin-locked prices
        #[arg(long)]
        force: bool,
    },
    /// Run offline battles between two synthetic fighters
    Simulate {
        #[arg(long, default_value_t = 1000)]
        count: u32,
        #[arg(long, default_value_t = 1)]
        level_a: u32,
        #[arg(long, default_value_t = 1)]
        level_b: u32,
        #[arg(long, default_value_t = 0)]
        bonus_a: i64,
        #[arg(long, default_value_t = 0)]
        bonus_b: i64,
        #[arg(long, default_value_t = 0)]
        armament_a: u32,
        #[arg(long, default_value_t = 0)]
        armament_b: u32,
        /// Seed for reproducible runs (falls back to the config seed)
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init runs before a config exists
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);
    if pre_config.is_some() {
        info!("Loaded configuration from {}", cli.config);
    }

    match cli.command {
        Commands::Init => {
            if std::path::Path::new(&cli.config).exists() {
                bail!("{} already exists; refusing to overwrite", cli.config);
            }
            Config::create_default(&cli.config).await?;
            println!("Created default configuration at {}", cli.config);
        }
        Commands::Status => {
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            let store = crew.store();
            println!("Crew Battles v{}", env!("CARGO_PKG_VERSION"));
            println!("Database: {}", config.db_path().display());
            println!("Size on disk: {} bytes", store.size_on_disk()?);
            println!(
                "Primary ledger: {}",
                config.economy.bank_file.as_deref().unwrap_or("(local only)")
            );
            let guilds = store.known_guilds()?;
            if guilds.is_empty() {
                println!("No guild data yet");
            }
            for guild in guilds {
                let players = store.all_players(guild)?;
                let started = players.values().filter(|p| p.started).count();
                println!(
                    "Guild {}: {} players ({} started), {} fruits in pool, {} in shop",
                    guild,
                    players.len(),
                    started,
                    store.list_pool(guild)?.len(),
                    store.list_shop(guild)?.len()
                );
            }
        }
        Commands::Export { guild, output } => {
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            let snapshot = crew.export_guild(guild, &output, Utc::now())?;
            println!(
                "Exported {} players of guild {} to {}",
                snapshot.players.len(),
                guild,
                output.display()
            );
        }
        Commands::Import { guild, input } => {
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            let restored = crew.import_guild(guild, &input)?;
            println!("Imported {} players into guild {}", restored, guild);
        }
        Commands::ResetPlayer { guild, player } => {
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            if crew.reset_player(guild, player)? {
                println!("Reset player {} in guild {}", player, guild);
            } else {
                println!("Player {} has no record in guild {}", player, guild);
            }
        }
        Commands::ResetStarted { guild } => {
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            let count = crew.reset_started(guild, Utc::now())?;
            println!("Reset {} started players in guild {}", count, guild);
        }
        Commands::Wipe { guild, yes } => {
            if !yes {
                bail!("wipe deletes every document of guild {}; pass --yes to confirm", guild);
            }
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            let summary = crew.wipe(guild)?;
            println!(
                "Wiped guild {}: {} players, {} ledger accounts, {} fruits",
                guild, summary.players, summary.ledger_accounts, summary.fruits
            );
        }
        Commands::Reprice { guild, force } => {
            let config = require_config(pre_config, &cli.config).await?;
            let crew = CrewBattles::from_config(&config)?;
            let changed = crew.reprice(guild, force)?;
            println!("Repriced {} fruits in guild {}", changed, guild);
        }
        Commands::Simulate {
            count,
            level_a,
            level_b,
            bonus_a,
            bonus_b,
            armament_a,
            armament_b,
            seed,
        } => {
            let seed = seed.or_else(|| pre_config.as_ref().and_then(|c| c.battle.seed));
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let a = Combatant {
                player_id: 1,
                level: level_a,
                fruit: None,
                fruit_bonus: bonus_a,
                armament: armament_a,
            };
            let b = Combatant {
                player_id: 2,
                level: level_b,
                fruit: None,
                fruit_bonus: bonus_b,
                armament: armament_b,
            };
            let (mut a_wins, mut turns) = (0u32, 0u64);
            for _ in 0..count {
                let outcome = simulate(a.clone(), b.clone(), &mut rng);
                if outcome.winner == Side::A {
                    a_wins += 1;
                }
                turns += u64::from(outcome.turns);
            }
            let total = count.max(1);
            println!(
                "{} battles: A won {} ({:.1}%), B won {} ({:.1}%), {:.1} turns on average",
                count,
                a_wins,
                f64::from(a_wins) * 100.0 / f64::from(total),
                count - a_wins,
                f64::from(count - a_wins) * 100.0 / f64::from(total),
                turns as f64 / f64::from(total)
            );
        }
    }

    Ok(())
}

async fn require_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(config) => Ok(config),
        // Load again so the actual error is reported
        None => Config::load(path).await,
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
