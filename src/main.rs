//! EVE Production Chain Calculator
//!
//! Builds production chains from the item catalog, prices them against a
//! market region and rolls up build costs, revenue and margin.

mod builder;
mod calculator;
mod db;
mod error;
mod extract;
mod models;
mod pricing;
mod repository;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ChainError;
use crate::models::{ChainNode, MarketPrice, ProductKind, Region};

/// Domain, so Amarr
const DEFAULT_MARKET_REGION_ID: i64 = 10000043;

#[derive(Parser)]
#[command(name = "prodchain")]
#[command(about = "Production chain cost calculator for EVE Online industry")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, env = "PRODCHAIN_DATABASE", default_value = "prodchain.db")]
    database: PathBuf,

    /// Owning group (e.g. corporation ID) for saved chains
    #[arg(short, long, env = "PRODCHAIN_OWNER", default_value_t = 0)]
    owner: i64,

    /// Log filter, e.g. "debug" or "prodchain=trace" (defaults to RUST_LOG, then info)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Load sample catalog and price data for testing (without a data export)
    LoadSample,

    /// Import catalog, region and price CSV dumps from a directory
    Import {
        /// Directory containing the CSV dumps
        dump_dir: PathBuf,

        /// Clear existing catalog data before import
        #[arg(long)]
        clear: bool,
    },

    /// Preview the production chain for an item type without saving it
    View {
        type_id: i64,

        /// Market region to price against
        #[arg(short, long, default_value_t = DEFAULT_MARKET_REGION_ID)]
        region: i64,

        /// Units desired
        #[arg(short, long, default_value_t = 1)]
        quantity: u64,
    },

    /// Create and save a new production chain
    New {
        type_id: i64,

        #[arg(short, long, default_value_t = DEFAULT_MARKET_REGION_ID)]
        region: i64,

        #[arg(short, long, default_value_t = 1)]
        quantity: u64,

        /// Create a new chain even if one already exists for this item
        #[arg(long)]
        force: bool,
    },

    /// List all saved production chains
    List,

    /// Display details for a saved production chain
    Show { chain_id: i64 },

    /// Edit one line of a saved production chain (line 0 is the main item)
    Set {
        chain_id: i64,
        line: usize,

        /// Production mode: buy or build
        #[arg(short, long)]
        kind: Option<ProductKind>,

        /// Units produced per run
        #[arg(short, long)]
        batch_size: Option<u32>,

        /// Material efficiency, e.g. 0.1 for 10%
        #[arg(short, long)]
        me: Option<Decimal>,

        /// Cost per unit
        #[arg(short, long)]
        price: Option<Decimal>,
    },

    /// Set the sell price per unit for the final product
    SellPrice { chain_id: i64, price: Decimal },

    /// Update market prices, optionally switching the target region
    Sync {
        chain_id: i64,

        #[arg(short, long)]
        region: Option<i64>,
    },
}

fn init_logging(level: Option<&str>) {
    let (filter, rejected) = match level {
        Some(level) => match EnvFilter::try_new(level) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new("debug"), Some(level)),
        },
        None => (
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            None,
        ),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(level) = rejected {
        warn!(filter = level, "invalid log level, defaulting to debug");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut conn = Connection::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;
    db::init_schema(&conn)?;
    info!(database = %cli.database.display(), owner = cli.owner, "opened database");

    match cli.command {
        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::LoadSample => {
            load_sample_data(&conn)?;
            println!("Sample data loaded successfully!");
        }

        Commands::Import { dump_dir, clear } => {
            if clear {
                println!("Clearing existing catalog data...");
                db::clear_catalog_data(&conn)?;
            }

            let stats = extract::import_to_database(&conn, &dump_dir)?;
            println!("\n{}", stats);
        }

        Commands::View {
            type_id,
            region,
            quantity,
        } => {
            let chain = preview_chain(&conn, cli.owner, type_id, quantity, region)?;
            print_chain(&conn, &chain)?;
        }

        Commands::New {
            type_id,
            region,
            quantity,
            force,
        } => {
            if !force {
                if let Some(chain_id) = db::find_chain_for_type(&conn, cli.owner, type_id)? {
                    println!("Production chain {} already exists for this item (use --force for another).\n", chain_id);
                    let chain = repository::load_chain(&conn, cli.owner, chain_id)?;
                    print_chain(&conn, &chain)?;
                    return Ok(());
                }
            }

            let mut chain = preview_chain(&conn, cli.owner, type_id, quantity, region)?;
            let chain_id = repository::save_chain(&mut conn, &mut chain)?;
            println!("Created production chain {}.\n", chain_id);
            print_chain(&conn, &chain)?;
        }

        Commands::List => {
            let chains = db::list_chains(&conn, cli.owner)?;
            println!("Listing {} production chains.\n", chains.len());
            if chains.is_empty() {
                println!("There are no production chains. Create a new production chain with");
                println!("  prodchain new <type_id>");
            } else {
                println!("{:<12}{:<16}{:<42}Type ID", "ID", "Region", "Name");
                for chain in chains {
                    println!(
                        "{:<12}{:<16}{:<42}{}",
                        chain.id,
                        region_label(&conn, chain.market_region_id)?,
                        calculator::item_name(&conn, chain.type_id),
                        chain.type_id
                    );
                }
            }
        }

        Commands::Show { chain_id } => {
            let chain = repository::load_chain(&conn, cli.owner, chain_id)?;
            print_chain(&conn, &chain)?;
        }

        Commands::Set {
            chain_id,
            line,
            kind,
            batch_size,
            me,
            price,
        } => {
            if kind.is_none() && batch_size.is_none() && me.is_none() && price.is_none() {
                bail!("nothing to change: pass --kind, --batch-size, --me or --price");
            }

            let mut chain = repository::load_chain(&conn, cli.owner, chain_id)?;
            let node = chain.line_mut(line).ok_or(ChainError::UnknownLine(line))?;
            if let Some(kind) = kind {
                node.set_kind(kind);
            }
            if let Some(batch_size) = batch_size {
                node.set_batch_size(batch_size)?;
            }
            if let Some(me) = me {
                node.set_material_efficiency(me)?;
            }
            if let Some(price) = price {
                node.set_market_price(price)?;
            }
            let name = calculator::item_name(&conn, node.type_id);

            repository::save_chain(&mut conn, &mut chain)?;
            println!("Updated {} (line {}).\n", name, line);
            print_chain(&conn, &chain)?;
        }

        Commands::SellPrice { chain_id, price } => {
            let mut chain = repository::load_chain(&conn, cli.owner, chain_id)?;
            chain.set_market_price(price)?;
            repository::save_chain(&mut conn, &mut chain)?;
            println!(
                "Updated {} sell price to {}.\n",
                calculator::item_name(&conn, chain.type_id),
                chain.market_price
            );
            print_chain(&conn, &chain)?;
        }

        Commands::Sync { chain_id, region } => {
            let mut chain = repository::load_chain(&conn, cli.owner, chain_id)?;
            let region = region.unwrap_or(match chain.market_region_id {
                0 => DEFAULT_MARKET_REGION_ID,
                current => current,
            });

            let report = pricing::sync_prices(&mut chain, &conn, region)?;
            print_missing_prices(&conn, &report)?;
            repository::save_chain(&mut conn, &mut chain)?;
            println!("Production chain prices updated for {}.\n", region_label(&conn, region)?);
            print_chain(&conn, &chain)?;
        }
    }

    Ok(())
}

/// Build a chain for `type_id` and price it against `region_id`
fn preview_chain(
    conn: &Connection,
    owner_id: i64,
    type_id: i64,
    quantity: u64,
    region_id: i64,
) -> Result<ChainNode> {
    let built = builder::build_chain(conn, owner_id, type_id, quantity)
        .with_context(|| format!("Error creating production chain for type {}", type_id))?;
    for cycle in &built.warnings {
        println!(
            "Warning: {} lists itself as a material; treating it as a raw material.",
            calculator::item_name(conn, cycle.type_id)
        );
    }

    let mut chain = built.chain;
    let report = pricing::sync_prices(&mut chain, conn, region_id)?;
    print_missing_prices(conn, &report)?;
    Ok(chain)
}

fn print_missing_prices(conn: &Connection, report: &pricing::SyncReport) -> Result<()> {
    if report.is_complete() {
        return Ok(());
    }
    let region = region_label(conn, report.region_id)?;
    for missing in &report.missing {
        println!(
            "Warning: no market data for {} in {}, priced at 0.",
            calculator::item_name(conn, missing.type_id),
            region
        );
    }
    println!();
    Ok(())
}

fn region_label(conn: &Connection, region_id: i64) -> Result<String> {
    Ok(db::region_name(conn, region_id)?.unwrap_or_else(|| format!("Region {}", region_id)))
}

fn print_chain(conn: &Connection, chain: &ChainNode) -> Result<()> {
    let region = region_label(conn, chain.market_region_id)?;
    println!("{}", calculator::format_production_chain(chain, conn, &region));
    Ok(())
}

/// Load a small sample catalog with Domain prices
fn load_sample_data(conn: &Connection) -> Result<()> {
    db::clear_catalog_data(conn)?;

    let items: &[(i64, &str, i64, &[(i64, u64)])] = &[
        (34, "Tritanium", 18, &[]),
        (35, "Pyerite", 18, &[]),
        (36, "Mexallon", 18, &[]),
        (37, "Isogen", 18, &[]),
        (38, "Nocxium", 18, &[]),
        (587, "Rifter", 25, &[(34, 32000), (35, 6000), (36, 2500), (37, 500)]),
        (11530, "Plasma Thruster", 334, &[(34, 1500), (36, 300), (38, 30)]),
        (11545, "Nanoelectrical Microprocessor", 334, &[(35, 800), (37, 120), (38, 40)]),
        (11379, "Wolf", 324, &[(587, 1), (11530, 4), (11545, 10)]),
    ];
    for (type_id, name, group_id, materials) in items {
        db::upsert_item_type(conn, *type_id, name, Some(*group_id))?;
        for (position, (material_type_id, quantity)) in materials.iter().enumerate() {
            db::upsert_material(conn, *type_id, *material_type_id, *quantity, position)?;
        }
    }

    db::upsert_region(
        conn,
        &Region {
            region_id: DEFAULT_MARKET_REGION_ID,
            name: "Domain".to_string(),
        },
    )?;
    db::upsert_region(
        conn,
        &Region {
            region_id: 10000002,
            name: "The Forge".to_string(),
        },
    )?;

    // Nanoelectrical Microprocessor is deliberately unlisted in Domain
    let prices: &[(i64, i64, i64)] = &[
        (DEFAULT_MARKET_REGION_ID, 34, 512),
        (DEFAULT_MARKET_REGION_ID, 35, 1105),
        (DEFAULT_MARKET_REGION_ID, 36, 7230),
        (DEFAULT_MARKET_REGION_ID, 37, 5150),
        (DEFAULT_MARKET_REGION_ID, 38, 81000),
        (DEFAULT_MARKET_REGION_ID, 587, 55_000_000),
        (DEFAULT_MARKET_REGION_ID, 11530, 2_450_000),
        (DEFAULT_MARKET_REGION_ID, 11379, 3_200_000_000),
        (10000002, 34, 498),
        (10000002, 35, 1060),
        (10000002, 36, 6990),
        (10000002, 37, 4925),
        (10000002, 38, 79500),
        (10000002, 11545, 1_310_000),
    ];
    for &(region_id, type_id, cents) in prices {
        let price = Decimal::new(cents, 2);
        db::upsert_market_price(
            conn,
            region_id,
            &MarketPrice {
                type_id,
                average: price,
                base: price,
            },
        )?;
    }

    println!("Loaded {} sample item types", items.len());
    Ok(())
}
