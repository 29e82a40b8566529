use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use feedkeeper::feed::{FeedImport, FeedSelection, FeedService, Sanitizer};
use feedkeeper::{CheckOptions, Config, Database, FeedUpdater, HttpFetcher, NewFeed, PollEngine};

#[derive(Parser, Debug)]
#[command(name = "feedkeeper")]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Check feeds that are due and reconcile their entries
    Check(CheckArgs),
    /// Check feeds periodically until interrupted
    Watch {
        /// Store new entries as read
        #[arg(long)]
        read: bool,
    },
    /// Clean up entries and counts
    Clean {
        /// Delete read entries of inactive feeds
        #[arg(long)]
        delete_read: bool,
        /// Recompute unread and total counts of every feed
        #[arg(long)]
        update_cache: bool,
        /// Delete entries whose expiry has passed
        #[arg(long)]
        expired: bool,
    },
    /// Subscribe to a feed
    Add {
        url: String,
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        site_url: Option<String>,
    },
    /// Import feeds from a tab separated file of title, feed URL, site URL
    Import {
        file: PathBuf,
        #[arg(long)]
        owner: i64,
        /// Delete the owner's feeds first
        #[arg(long)]
        purge: bool,
    },
    /// Re-enable a deactivated feed
    Reactivate { id: i64 },
}

#[derive(Args, Debug, Clone)]
struct CheckArgs {
    /// Check even if not due and ignore the feed's updated time
    #[arg(long)]
    force: bool,
    /// Store new entries as read
    #[arg(long)]
    read: bool,
    /// Delete the selected feeds' entries before checking
    #[arg(long)]
    purge: bool,
    /// Log each feed's result
    #[arg(short, long)]
    verbose: bool,
    /// Only check the feed with this URL
    #[arg(long)]
    url: Option<String>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn load_config(path: &PathBuf) -> Config {
    match Config::load_with_env(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", path.display());
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(&cli.config);

    let verbose = matches!(&cli.command, Command::Check(args) if args.verbose);
    if let Err(e) = feedkeeper::logging::init(&config.logging, verbose) {
        eprintln!("Failed to initialize logging: {e}");
        feedkeeper::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> feedkeeper::Result<()> {
    let db = Database::open(&config.database.path).await?;

    let result = match command {
        Command::Check(args) => check(&db, &config, args).await,
        Command::Watch { read } => watch(&db, &config, read).await,
        Command::Clean {
            delete_read,
            update_cache,
            expired,
        } => {
            let service = FeedService::new(&db);
            if delete_read {
                service.delete_read_entries_of_inactive_feeds().await?;
            }
            if expired {
                service.sweep_expired().await?;
            }
            if update_cache {
                service.update_cache().await?;
            }
            Ok(())
        }
        Command::Add {
            url,
            owner,
            title,
            site_url,
        } => {
            let mut new_feed = NewFeed::new(owner, url);
            if let Some(title) = title {
                new_feed = new_feed.with_title(title);
            }
            if let Some(site_url) = site_url {
                new_feed = new_feed.with_site_url(site_url);
            }
            let feed = FeedService::new(&db).add_feed(&new_feed).await?;
            println!("{}", feed.id);
            Ok(())
        }
        Command::Import { file, owner, purge } => {
            let content = std::fs::read_to_string(&file)?;
            let feeds = parse_import(&content);
            let summary = FeedService::new(&db)
                .import_feeds(owner, &feeds, purge)
                .await?;
            println!(
                "{} created, {} already present, {} purged",
                summary.created, summary.existing, summary.purged
            );
            Ok(())
        }
        Command::Reactivate { id } => {
            FeedService::new(&db).reactivate_feed(id).await?;
            Ok(())
        }
    };

    db.close().await;
    result
}

async fn check(db: &Database, config: &Config, args: CheckArgs) -> feedkeeper::Result<()> {
    let engine = PollEngine::new(
        db.clone(),
        HttpFetcher::new(&config.poll)?,
        config.poll.clone(),
        Sanitizer::from_config(&config.sanitizer),
    );
    let selection = match args.url {
        Some(url) => FeedSelection::Url(url),
        None => FeedSelection::All,
    };
    let options = CheckOptions {
        force: args.force,
        mark_read: args.read,
        verbose: args.verbose,
    };

    let report = engine.run(&selection, &options, args.purge).await?;
    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| feedkeeper::FeedkeeperError::Validation(e.to_string()))?;
        println!("{json}");
    }
    Ok(())
}

async fn watch(db: &Database, config: &Config, read: bool) -> feedkeeper::Result<()> {
    let engine = PollEngine::new(
        db.clone(),
        HttpFetcher::new(&config.poll)?,
        config.poll.clone(),
        Sanitizer::from_config(&config.sanitizer),
    );
    let updater = FeedUpdater::new(Arc::new(engine)).with_options(CheckOptions {
        mark_read: read,
        ..CheckOptions::default()
    });

    updater
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await;
    Ok(())
}

/// One feed per line: title, feed URL and optional site URL separated by
/// tabs. Blank lines and lines starting with `#` are ignored.
fn parse_import(content: &str) -> Vec<FeedImport> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let title = fields.next()?.trim();
            let feed_url = fields.next()?.trim();
            let site_url = fields.next().unwrap_or("").trim();
            Some(FeedImport::new(title, feed_url, site_url))
        })
        .collect()
}
