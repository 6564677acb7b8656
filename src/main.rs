//! Provenance ledger CLI application
//!
//! A command-line interface for registering and verifying products.

use clap::{Parser, Subcommand};
use provenance_ledger::api::{create_router, ApiState};
use provenance_ledger::cli::{self, AppState};
use provenance_ledger::core::{LedgerConfig, ProductRegistration, SharedLedger};
use provenance_ledger::storage::{Storage, StorageConfig};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "provenance")]
#[command(version = "0.1.0")]
#[command(about = "Product authenticity ledger with proof-of-work blocks", long_about = None)]
struct Cli {
    /// Data directory for ledger storage
    #[arg(short, long, default_value = ".provenance_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new ledger
    Init {
        /// Mining difficulty (number of leading zero hex characters)
        #[arg(short, long)]
        difficulty: Option<usize>,
    },

    /// Register a product (signed by its manufacturer)
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        manufacturer: String,

        #[arg(long)]
        batch: String,

        /// Manufacture date, e.g. 2025-03-01
        #[arg(long)]
        date: String,

        /// Mine the pending pool right after registering
        #[arg(long)]
        mine: bool,
    },

    /// Mine all pending records into a block
    Mine {
        /// Difficulty (defaults to the ledger's, may not be lower)
        #[arg(short, long)]
        difficulty: Option<usize>,

        /// Give up after this many nonce attempts
        #[arg(long)]
        max_iterations: Option<u64>,
    },

    /// Verify a product by product id or record id
    Verify {
        /// Product id or record id
        id: String,
    },

    /// Display ledger information
    Chain {
        #[command(subcommand)]
        action: Option<ChainCommands>,
    },

    /// Validate the ledger
    Validate,

    /// Show records waiting to be mined
    Pending,

    /// List registered manufacturers
    Manufacturers,

    /// List registered products
    Products,

    /// Export ledger to file
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import ledger from file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// REST API server
    Api {
        #[command(subcommand)]
        action: ApiCommands,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Show detailed info
    Info,

    /// List recent blocks
    Blocks {
        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Show one block
    Block {
        /// Block index
        index: u64,
    },
}

#[derive(Subcommand)]
enum ApiCommands {
    /// Start the REST API server
    Start {
        /// Port to listen on for REST API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Do not mine automatically after each registration
        #[arg(long)]
        no_auto_mine: bool,

        /// Give up a mining round after this many nonce attempts
        #[arg(long)]
        max_iterations: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Commands that must not load (and therefore validate) the ledger first
    match &cli.command {
        Commands::Init { difficulty } => return cli::cmd_init(&cli.data_dir, *difficulty),
        Commands::Validate => return cli::cmd_validate(&cli.data_dir),
        Commands::Api { action } => return run_api_command(action, &cli.data_dir),
        _ => {}
    }

    let mut state = AppState::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Init { .. } | Commands::Validate | Commands::Api { .. } => {}

        Commands::Register {
            name,
            manufacturer,
            batch,
            date,
            mine,
        } => {
            let registration = ProductRegistration::new(name, manufacturer, batch, date);
            cli::cmd_register(&mut state, registration, mine)?;
        }

        Commands::Mine {
            difficulty,
            max_iterations,
        } => {
            cli::cmd_mine(&mut state, difficulty, max_iterations)?;
        }

        Commands::Verify { id } => {
            cli::cmd_verify(&state, &id)?;
        }

        Commands::Chain { action } => match action {
            None | Some(ChainCommands::Info) => {
                cli::cmd_chain_info(&state)?;
            }
            Some(ChainCommands::Blocks { count }) => {
                cli::cmd_chain_blocks(&state, count)?;
            }
            Some(ChainCommands::Block { index }) => {
                cli::cmd_block(&state, index)?;
            }
        },

        Commands::Pending => {
            cli::cmd_pending(&state)?;
        }

        Commands::Manufacturers => {
            cli::cmd_manufacturers(&state)?;
        }

        Commands::Products => {
            cli::cmd_products(&state)?;
        }

        Commands::Export { output } => {
            cli::cmd_export(&state, &output)?;
        }

        Commands::Import { input } => {
            cli::cmd_import(&mut state, &input)?;
        }
    }

    Ok(())
}

fn run_api_command(action: &ApiCommands, data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        match action {
            ApiCommands::Start {
                port,
                no_auto_mine,
                max_iterations,
            } => {
                let storage = Storage::new(StorageConfig {
                    data_dir: data_dir.to_path_buf(),
                    ..Default::default()
                })?;

                println!("📂 Opening ledger at {:?}...", data_dir);
                let config = LedgerConfig {
                    max_iterations: *max_iterations,
                    ..Default::default()
                };
                let ledger = SharedLedger::open(storage, &config)?;

                let state = ApiState::new(ledger.clone(), !no_auto_mine);
                let app = create_router(state);

                let addr = format!("0.0.0.0:{}", port);
                println!("🚀 REST API server starting on http://localhost:{}", port);
                println!(
                    "   Auto-mine: {}",
                    if *no_auto_mine { "off" } else { "on" }
                );
                println!();
                println!("📖 Available endpoints:");
                println!("   GET  /health                        - Health check");
                println!("   GET  /ws                            - WebSocket updates");
                println!("   POST /api/products                  - Register product");
                println!("   GET  /api/products                  - List products");
                println!("   GET  /api/verify/{{product_id}}       - Verify product");
                println!("   GET  /api/chain                     - Full chain and stats");
                println!("   GET  /api/chain/blocks/{{index}}      - Get block");
                println!("   GET  /api/chain/validate            - Validate chain");
                println!("   GET  /api/stats                     - Ledger statistics");
                println!("   POST /api/mine                      - Mine pending records");
                println!("   GET  /api/pending                   - Pending records");
                println!("   GET  /api/manufacturers             - Manufacturers");
                println!();

                let listener = tokio::net::TcpListener::bind(&addr).await?;
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        tokio::signal::ctrl_c().await.ok();
                        println!("\n📴 Shutting down API server...");
                        ledger.shutdown();
                    })
                    .await?;
            }
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
