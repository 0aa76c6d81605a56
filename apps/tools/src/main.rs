use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::ItemUpdate;
use storage::{
    FileSnapshotStore, OrderedStore, PersistenceController, PersistenceOptions, SnapshotStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "./data/sorted_order.json")]
    data_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Overwrite the snapshot with freshly generated items.
    Generate {
        #[arg(default_value_t = 1_000_000)]
        count: usize,
    },
    Inspect {
        #[arg(long, default_value_t = 5)]
        head: usize,
    },
    /// Fail when positions are not exactly 1..=N.
    Verify,
    Search {
        term: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Renumber positions to 1..=N keeping the current order.
    Repair,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let sink = Arc::new(FileSnapshotStore::new(&cli.data_file));

    match cli.command {
        Command::Generate { count } => {
            let store = OrderedStore::generate(count);
            sink.save(store.snapshot().await).await?;
            println!("generated {count} items into {}", sink.describe());
        }
        Command::Inspect { head } => {
            let store = load(sink.as_ref()).await?;
            if store.is_empty().await {
                println!("{} holds no items", sink.describe());
                return Ok(());
            }
            println!(
                "items={} selected={}",
                store.len().await,
                store.selected_count().await
            );
            for item in store.query("", 0, head).await.items {
                println!(
                    "{:>8}  {}  {}{}",
                    item.position,
                    item.id,
                    item.name,
                    if item.selected { "  [selected]" } else { "" }
                );
            }
        }
        Command::Verify => {
            let store = load(sink.as_ref()).await?;
            if let Err(violation) = store.verify_positions().await {
                bail!("{}: {violation}", sink.describe());
            }
            println!("ok: {} items in order", store.len().await);
        }
        Command::Search {
            term,
            offset,
            limit,
        } => {
            let store = load(sink.as_ref()).await?;
            let page = store.query(&term, offset, limit).await;
            println!("total={}", page.total);
            for item in page.items {
                println!("{:>8}  {}", item.position, item.name);
            }
        }
        Command::Repair => {
            let store = load(sink.as_ref()).await?;
            let updates: Vec<ItemUpdate> = store
                .snapshot()
                .await
                .into_iter()
                .enumerate()
                .map(|(index, item)| ItemUpdate {
                    id: item.id,
                    position: index as i64 + 1,
                    selected: item.selected,
                })
                .collect();
            if let Some(violation) = store.apply_batch(&updates).await.violation {
                bail!("renumbering left positions out of order: {violation}");
            }

            let persistence =
                PersistenceController::spawn(store.clone(), sink, PersistenceOptions::default());
            persistence.flush_now().await?;
            persistence.shutdown().await?;
            println!("repaired {} items", updates.len());
        }
    }

    Ok(())
}

async fn load(sink: &dyn SnapshotStore) -> Result<OrderedStore> {
    let items = sink.load().await?;
    let store = OrderedStore::from_items(items)
        .with_context(|| format!("snapshot {} is not loadable", sink.describe()))?;
    Ok(store)
}
