mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use apikit_db::{ApiConfig, DbHandle, Id, SqliteRunner};
use apikit_inventory::{build_api, init, load_caller};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};

/// apikit - query the inventory API from the command line
#[derive(Parser)]
#[command(name = "apikit")]
#[command(about = "apikit - query the inventory API from the command line")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the inventory tables
    Init {
        /// Also load the demo data set
        #[arg(long)]
        seed: bool,
    },
    /// Run an entity get and print the result as JSON
    Get {
        /// Entity name, e.g. `host`
        entity: String,
        /// Options object
        #[arg(default_value = "{}")]
        options: String,
        /// Calling user
        #[arg(short, long)]
        user: Id,
        /// Load schema and demo data first (for in-memory databases)
        #[arg(long)]
        demo: bool,
    },
    /// List the registered entities
    Entities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }
    let config = ApiConfig::load(cli.config.as_deref())?;
    logging::init(cli.verbose, cli.json_logs, config.query.log_statements);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command()
            .error(
                ErrorKind::MissingSubcommand,
                "a command is required unless --print-config is given",
            )
            .exit();
    };

    let db = DbHandle::connect(&config.database.dsn, config.database.connect_opts())
        .await
        .with_context(|| format!("cannot open {}", config.database.dsn))?;
    tracing::info!(dsn = db.dsn(), "database opened");
    let result = run(command, &config, &db).await;
    db.close().await;
    result
}

async fn run(command: Commands, config: &ApiConfig, db: &DbHandle) -> Result<()> {
    match command {
        Commands::Init { seed } => {
            init(db, seed).await?;
            println!("schema ready");
        }
        Commands::Entities => {
            let api = build_api(SqliteRunner::from_handle(db));
            for name in api.entity_names() {
                println!("{name}");
            }
        }
        Commands::Get {
            entity,
            options,
            user,
            demo,
        } => {
            if demo {
                init(db, true).await?;
            }
            let options: serde_json::Value =
                serde_json::from_str(&options).context("options must be a JSON object")?;
            let runner = SqliteRunner::from_handle(db).with_statement_logging(config.query.log_statements);
            let api = build_api(runner).with_config(config.query.clone());

            let result = async {
                let caller = load_caller(db, user).await?;
                api.get(&caller, &entity, &options).await
            };
            match result.await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result.into_value())?),
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.to_problem())?);
                    anyhow::bail!("{entity}.get failed: {err}");
                }
            }
        }
    }
    Ok(())
}
