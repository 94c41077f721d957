use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "evento", about = "Evento to LMS import", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "evento.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

/// Feed selection for `import`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum ImportSelection {
    Users,
    Events,
    Admins,
    /// Users, then events, then admins
    All,
}

/// A single feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum FeedArg {
    Users,
    Events,
    Admins,
}

impl From<FeedArg> for evento_core::models::import::ImportKind {
    fn from(arg: FeedArg) -> Self {
        use evento_core::models::import::ImportKind;
        match arg {
            FeedArg::Users => ImportKind::Users,
            FeedArg::Events => ImportKind::Events,
            FeedArg::Admins => ImportKind::Admins,
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create the data directory, a default configuration and the database
    Init {
        /// Data directory path
        #[arg(long, default_value = "/var/lib/evento")]
        data_dir: String,
    },
    /// Run an import from the Evento feeds
    Import {
        #[arg(value_enum)]
        kind: ImportSelection,
        /// Decide every action and report it without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild the location table from the target category tree
    ReloadLocations,
    /// List the stored location table
    Locations,
    /// Show the latest runs, held locks and open anomalies
    Status,
    /// Print raw records from a feed
    Fetch {
        #[arg(value_enum)]
        kind: FeedArg,
        /// Fetch a single record by its Evento id
        #[arg(long, conflicts_with_all = ["skip", "take"])]
        id: Option<i64>,
        #[arg(long, default_value = "0")]
        skip: u32,
        #[arg(long, default_value = "10")]
        take: u32,
    },
    /// Release a run lock left behind by a crashed run
    Unlock {
        #[arg(value_enum)]
        kind: FeedArg,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir } => {
            commands::init::run(&data_dir).await?;
        }
        Commands::Import { kind, dry_run } => {
            let kinds = match kind {
                ImportSelection::Users => vec![FeedArg::Users.into()],
                ImportSelection::Events => vec![FeedArg::Events.into()],
                ImportSelection::Admins => vec![FeedArg::Admins.into()],
                ImportSelection::All => evento_core::models::import::ImportKind::ALL.to_vec(),
            };
            commands::import::run(&cli.config, &kinds, dry_run).await?;
        }
        Commands::ReloadLocations => {
            commands::locations::reload(&cli.config).await?;
        }
        Commands::Locations => {
            commands::locations::list(&cli.config).await?;
        }
        Commands::Status => {
            commands::status::run(&cli.config).await?;
        }
        Commands::Fetch {
            kind,
            id,
            skip,
            take,
        } => {
            commands::fetch::run(&cli.config, kind.into(), id, skip, take).await?;
        }
        Commands::Unlock { kind } => {
            commands::unlock::run(&cli.config, kind.into()).await?;
        }
    }

    Ok(())
}
