use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chest_ledger::{Address, Amount, LedgerConfig, MatrixLedger};

#[derive(Parser)]
#[command(name = "chest-ledger", version, about = "Matrix referral ledger with tiered chest payouts")]
struct Cli {
    /// Ledger state file
    #[arg(long, default_value = "chest-ledger.state.json")]
    state: PathBuf,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh ledger state file
    Init {
        /// JSON ledger configuration; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        admin: Option<Address>,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Credit native funds to an account
    Fund { account: Address, amount: Amount },
    /// Register CALLER under SPONSOR, paying PAID
    Join {
        caller: Address,
        sponsor: Address,
        paid: Amount,
    },
    SetPrice {
        caller: Address,
        tier: usize,
        price: Amount,
    },
    SetWidth { caller: Address, width: u32 },
    TransferOwnership { caller: Address, new_owner: Address },
    RenounceOwnership { caller: Address },
    /// Print a user's record and balance
    Show { user: Address },
    Tiers,
    /// User at SLOT on level DEPTH below USER
    Downline {
        user: Address,
        depth: usize,
        slot: usize,
    },
    Events,
    Snapshot,
    /// Register seeded random users under random existing sponsors
    Simulate {
        #[arg(long, default_value_t = 30)]
        users: usize,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(path: &Path) -> Result<MatrixLedger> {
    MatrixLedger::load(path).with_context(|| "run `chest-ledger init` first".to_string())
}

fn save(ledger: &MatrixLedger, path: &Path) -> Result<()> {
    ledger.save(path)?;
    info!(path = %path.display(), height = ledger.meta().height, "state saved");
    Ok(())
}

fn init_cmd(state: &Path, config: Option<&Path>, admin: Option<Address>, force: bool) -> Result<()> {
    if state.exists() && !force {
        bail!("state file {} already exists, pass --force to overwrite", state.display());
    }
    let mut config = match config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(admin) = admin {
        config.admin = admin;
    }
    let ledger = MatrixLedger::new(&config)?;
    save(&ledger, state)?;
    print_json(&ledger.snapshot())
}

fn show_cmd(ledger: &MatrixLedger, user: &str) -> Result<()> {
    let record = ledger
        .registry()
        .user(user)
        .with_context(|| format!("{user} is not registered"))?;
    print_json(&json!({
        "address": record.address,
        "sponsor": record.sponsor,
        "placement_parent": ledger.placement_parent_of(user)?,
        "children": record.children.len(),
        "qualifying_count": record.qualifying_count,
        "unlocked_tier": record.unlocked_tier,
        "level": record.level(),
        "balance": ledger.balance_of(user).to_string(),
    }))
}

fn simulate_cmd(ledger: &mut MatrixLedger, users: usize, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let offset = ledger.registry().len();
    let mut unlocks = 0usize;
    for n in 0..users {
        let caller = format!("sim-{}", offset + n);
        let sponsor_slot = rng.gen_range(0..ledger.registry().len());
        let sponsor = ledger
            .registry()
            .iter()
            .nth(sponsor_slot)
            .map(|(_, user)| user.address.clone())
            .context("registry is never empty")?;
        let entry = ledger.chests().entry_price();
        let paid = entry + rng.gen_range(0..=entry);
        ledger.fund(&caller, paid)?;
        let receipt = ledger.join(&caller, &sponsor, paid)?;
        unlocks += receipt.unlocks.len();
    }
    info!(users, seed, unlocks, "simulation finished");
    print_json(&json!({
        "registered": users,
        "unlocks": unlocks,
        "snapshot": ledger.snapshot(),
    }))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let state = cli.state.as_path();

    match cli.command {
        Command::Init {
            config,
            admin,
            force,
        } => init_cmd(state, config.as_deref(), admin, force),
        Command::Fund { account, amount } => {
            let mut ledger = load(state)?;
            ledger.fund(&account, amount)?;
            save(&ledger, state)?;
            println!("{}", ledger.balance_of(&account));
            Ok(())
        }
        Command::Join {
            caller,
            sponsor,
            paid,
        } => {
            let mut ledger = load(state)?;
            let receipt = ledger.join(&caller, &sponsor, paid)?;
            save(&ledger, state)?;
            print_json(&receipt)
        }
        Command::SetPrice {
            caller,
            tier,
            price,
        } => {
            let mut ledger = load(state)?;
            ledger.set_price(&caller, tier, price)?;
            save(&ledger, state)?;
            print_json(&ledger.tier(tier)?)
        }
        Command::SetWidth { caller, width } => {
            let mut ledger = load(state)?;
            ledger.set_structure_width(&caller, width)?;
            save(&ledger, state)
        }
        Command::TransferOwnership { caller, new_owner } => {
            let mut ledger = load(state)?;
            ledger.transfer_ownership(&caller, &new_owner)?;
            save(&ledger, state)
        }
        Command::RenounceOwnership { caller } => {
            let mut ledger = load(state)?;
            ledger.renounce_ownership(&caller)?;
            save(&ledger, state)
        }
        Command::Show { user } => show_cmd(&load(state)?, &user),
        Command::Tiers => {
            let ledger = load(state)?;
            let tiers: Vec<_> = ledger.chests().iter().collect();
            print_json(&tiers)
        }
        Command::Downline { user, depth, slot } => {
            let ledger = load(state)?;
            match ledger.downline_at(&user, depth, slot)? {
                Some(found) => println!("{found}"),
                None => bail!("no user at depth {depth}, slot {slot} below {user}"),
            }
            Ok(())
        }
        Command::Events => print_json(&load(state)?.events()),
        Command::Snapshot => print_json(&load(state)?.snapshot()),
        Command::Simulate { users, seed } => {
            let mut ledger = load(state)?;
            simulate_cmd(&mut ledger, users, seed)?;
            save(&ledger, state)
        }
    }
}
