//! bookshare CLI: inspect epub archives and manage local share settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use bookshare::error::BookshareResult;
use bookshare::hash::{ContentHash, hash_bytes, hash_reader};
use bookshare::identity::{AuthorAddress, AuthorKeypair, ShareAddress};
use bookshare::library::{BookCatalog, BookPath, CatalogEntry, extract_bytes};
use bookshare::paths::BooksharePaths;
use bookshare::settings::{BookshareConfig, FileSettings};
use bookshare::store::MemoryReplica;

#[derive(Parser)]
#[command(name = "bookshare", version, about = "E-book catalog over shared document stores")]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/bookshare/settings.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the metadata extracted from an epub.
    Inspect {
        file: PathBuf,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the content hash of a file.
    Hash { file: PathBuf },

    /// Print the storage path a book would be written to.
    Path {
        /// Uploader address, e.g. `@suzy.b3kx...`.
        #[arg(long)]
        author: String,

        file: PathBuf,
    },

    /// Index every `.epub` in a directory into a scratch catalog and print it.
    Scan {
        dir: PathBuf,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved settings.
    Config,

    /// Manage known shares.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Add a share, optionally with its write secret.
    Add {
        address: String,

        #[arg(long)]
        secret: Option<String>,
    },

    /// Forget a share.
    Remove { address: String },

    /// List known shares.
    List,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { file, json } => {
            let data = std::fs::read(&file).into_diagnostic()?;
            let metadata = extract_bytes(&data)?;
            let hash = hash_bytes(&data);
            if json {
                let value = serde_json::json!({
                    "hash": hash,
                    "metadata": metadata,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).into_diagnostic()?
                );
            } else {
                println!("File:        {}", file.display());
                println!("Hash:        {hash}");
                println!("Title:       {}", metadata.title);
                match &metadata.creators {
                    Some(creators) => println!("Creators:    {}", creators.join(", ")),
                    None => println!("Creators:    (none)"),
                }
                println!("Language:    {}", metadata.language);
                for id in &metadata.identifiers {
                    println!("Identifier:  {} {}", id.scheme, id.value);
                }
                if let Some(date) = metadata.publication_date {
                    println!("Published:   {date}");
                }
                match &metadata.cover {
                    Some(cover) => println!(
                        "Cover:       {} bytes ({})",
                        cover.bytes.len(),
                        cover.mime_type.as_deref().unwrap_or("type unknown")
                    ),
                    None => println!("Cover:       (none)"),
                }
            }
        }

        Commands::Hash { file } => {
            println!("{}", hash_file(&file)?);
        }

        Commands::Path { author, file } => {
            let path = BookPath::new(AuthorAddress::new(author), hash_file(&file)?);
            println!("{path}");
        }

        Commands::Scan { dir, json } => {
            let settings = load_settings(cli.config.as_deref())?;
            let author = settings
                .config()
                .author_keypair()
                .unwrap_or_else(|| AuthorKeypair::new("@local.bookshare", ""));
            let catalog_config = settings.config().to_catalog_config();
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            let books = runtime.block_on(scan(&dir, author, catalog_config))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&books).into_diagnostic()?);
            } else {
                println!("{} book(s):", books.len());
                for book in &books {
                    println!("  {}  {}", book.hash, book.metadata.summary());
                }
            }
        }

        Commands::Config => {
            let (path, paths) = settings_path(cli.config.as_deref())?;
            let config = BookshareConfig::load_or_default(&path)?;
            println!("Settings: {}", path.display());
            if let Some(paths) = &paths {
                println!("Data:     {}", paths.data_dir.display());
            }
            println!();
            print!("{}", toml::to_string_pretty(&config).into_diagnostic()?);
            if let Some(paths) = &paths {
                for share in &config.shares {
                    let share = ShareAddress::new(share.as_str());
                    println!("# {share} -> {}", paths.share_dir(&share).display());
                }
            }
        }

        Commands::Share { action } => {
            let settings = load_settings(cli.config.as_deref())?;
            match action {
                ShareAction::Add { address, secret } => {
                    let share = ShareAddress::new(address);
                    let writable = secret.is_some();
                    settings.add_share(&share, secret)?;
                    println!(
                        "Added {share} ({})",
                        if writable { "writable" } else { "read-only" }
                    );
                }
                ShareAction::Remove { address } => {
                    let share = ShareAddress::new(address);
                    settings.remove_share(&share)?;
                    println!("Removed {share}");
                }
                ShareAction::List => {
                    let config = settings.config();
                    if config.shares.is_empty() {
                        println!("No shares.");
                    }
                    for share in &config.shares {
                        let access = if config.share_secrets.contains_key(share) {
                            "writable"
                        } else {
                            "read-only"
                        };
                        println!("{share}  {access}");
                    }
                }
            }
        }
    }

    Ok(())
}

fn hash_file(file: &Path) -> Result<ContentHash> {
    let reader = std::fs::File::open(file).into_diagnostic()?;
    hash_reader(std::io::BufReader::new(reader)).into_diagnostic()
}

/// The settings file to use, plus the resolved XDG layout when no explicit
/// path was given.
fn settings_path(explicit: Option<&Path>) -> BookshareResult<(PathBuf, Option<BooksharePaths>)> {
    match explicit {
        Some(path) => Ok((path.to_path_buf(), None)),
        None => {
            let paths = BooksharePaths::resolve()?;
            Ok((paths.settings_file(), Some(paths)))
        }
    }
}

fn load_settings(explicit: Option<&Path>) -> BookshareResult<FileSettings> {
    let (path, paths) = settings_path(explicit)?;
    if let Some(paths) = paths {
        paths.ensure_dirs()?;
    }
    Ok(FileSettings::open(path)?)
}

async fn scan(
    dir: &Path,
    author: AuthorKeypair,
    config: bookshare::library::CatalogConfig,
) -> Result<Vec<CatalogEntry>> {
    let replica = Arc::new(MemoryReplica::new(ShareAddress::new("+scan.local")));
    let catalog = BookCatalog::open(replica, config);

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_diagnostic()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"))
        })
        .collect();
    entries.sort();

    for path in entries {
        let file = tokio::fs::File::open(&path).await.into_diagnostic()?;
        if let Err(e) = catalog.add_book(&author, file).await {
            tracing::warn!(path = %path.display(), error = %e, "skipping archive");
        }
    }

    catalog.settled().await;
    let mut books = catalog.all_books();
    books.sort_by(|a, b| a.metadata.title.cmp(&b.metadata.title));
    catalog.close().await?;
    Ok(books)
}
