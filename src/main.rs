//! # SDCH CLI (`sdch`)
//!
//! Front end for the document context engine. Configuration comes from the
//! environment (see [`sdch::config`]); `RUST_LOG` controls log output.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sdch init` | Create the database schema (idempotent) |
//! | `sdch upload <path>` | Ingest a document and print its tier and budget |
//! | `sdch query <doc_id> "<query>"` | Assemble context for a query |
//! | `sdch list` | List recent documents |
//! | `sdch get <doc_id>` | Show one document's metadata |
//! | `sdch delete <doc_id>` | Delete a document and its derived state |
//! | `sdch serve` | Start the HTTP API |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sdch::budget;
use sdch::config::Config;
use sdch::engine::Engine;
use sdch::server;
use sdch::store;

/// Smart document context handler: tiered, token-budgeted context
/// construction for LLM windows.
#[derive(Parser)]
#[command(
    name = "sdch",
    about = "Smart document context handler",
    version,
    long_about = "Ingests documents (txt, md, pdf, docx, csv, tsv, xlsx), classifies them \
    into processing tiers by exact token count, and assembles query-relevant context \
    bounded by a fixed token budget."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upload a document from the local filesystem.
    Upload {
        /// Path to the document (.txt .md .pdf .docx .csv .tsv .xlsx).
        path: PathBuf,
    },

    /// Assemble context for a document and query.
    Query {
        /// Document id from a previous upload.
        doc_id: Uuid,
        /// The user query to rank against.
        query: String,
        /// Maximum chunks to select (tiers 3 and 4).
        #[arg(long)]
        top_k: Option<usize>,
        /// Print only the assembled context, no metadata.
        #[arg(long)]
        raw: bool,
    },

    /// List recent documents, newest first.
    List {
        /// Maximum number of rows.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show one document's metadata.
    Get { doc_id: Uuid },

    /// Delete a document, its chunks, and its cached index.
    Delete { doc_id: Uuid },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command {
        Commands::Init => {
            let pool = store::connect(&cfg.database_url).await?;
            store::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { path } => {
            let engine = Engine::new(cfg).await?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());

            let doc = engine.upload(bytes, &filename, None).await?;
            let budget = budget::allocate(&engine.config().budget, doc.token_count as usize);

            println!("uploaded {}", doc.filename);
            println!("  id:         {}", doc.id);
            println!("  size:       {} bytes", doc.file_size);
            println!("  mime:       {}", doc.mime_type);
            println!("  tokens:     {}", doc.token_count);
            println!("  tier:       {} ({})", doc.tier.as_u8(), doc.tier.label());
            if let Some(pages) = doc.page_count {
                println!("  pages:      {}", pages);
            }
            if let Some(rows) = doc.row_count {
                println!("  rows:       {}", rows);
            }
            println!(
                "  budget:     {}/{} document tokens",
                budget.document_allocated, budget.document_max
            );
        }
        Commands::Query {
            doc_id,
            query,
            top_k,
            raw,
        } => {
            let engine = Engine::new(cfg).await?;
            let cancel = CancellationToken::new();
            let outcome = engine.query(doc_id, &query, top_k, &cancel).await?;
            let ctx = outcome.context;

            if raw {
                println!("{}", ctx.text);
                return Ok(());
            }

            println!("query: {}", query);
            println!("  tier:    {}", outcome.document.tier.as_u8());
            println!("  tokens:  {}", ctx.token_count);
            println!("  notes:   {}", ctx.strategy_notes);
            if !ctx.chunks_used.is_empty() {
                println!("  chunks:");
                for used in &ctx.chunks_used {
                    println!(
                        "    [{}] {} tokens, score {:.4}",
                        used.index, used.tokens, used.score
                    );
                }
            }
            println!();
            println!("{}", ctx.text);
        }
        Commands::List { limit } => {
            let engine = Engine::new(cfg).await?;
            let docs = engine.list_documents(limit).await?;
            if docs.is_empty() {
                println!("No documents.");
                return Ok(());
            }
            for doc in docs {
                println!(
                    "{}  T{}  {:>9} tokens  {}  {}",
                    doc.id,
                    doc.tier.as_u8(),
                    doc.token_count,
                    doc.created_at.format("%Y-%m-%d %H:%M"),
                    doc.filename
                );
            }
        }
        Commands::Get { doc_id } => {
            let engine = Engine::new(cfg).await?;
            let doc = engine.get_document(doc_id).await?;
            println!("id:          {}", doc.id);
            println!("filename:    {}", doc.filename);
            println!("size:        {} bytes", doc.file_size);
            println!("mime:        {}", doc.mime_type);
            println!("tokens:      {}", doc.token_count);
            println!(
                "tier:        {} ({}: {})",
                doc.tier.as_u8(),
                doc.tier.label(),
                doc.tier.description()
            );
            if let Some(pages) = doc.page_count {
                println!("pages:       {}", pages);
            }
            if let Some(rows) = doc.row_count {
                println!("rows:        {}", rows);
            }
            println!("status:      {}", doc.status.as_str());
            println!("created_at:  {}", doc.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
        }
        Commands::Delete { doc_id } => {
            let engine = Engine::new(cfg).await?;
            engine.delete_document(doc_id).await?;
            println!("Deleted {}.", doc_id);
        }
        Commands::Serve => {
            let engine = Arc::new(Engine::new(cfg).await?);
            server::run_server(engine).await?;
        }
    }

    Ok(())
}
