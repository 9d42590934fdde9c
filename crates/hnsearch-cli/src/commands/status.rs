//! Status command - show index, corpus, and mirror state

use anyhow::Result;
use clap::Args;
use hnsearch_core::{CorpusStore, Mirror, MIRROR_FILE};
use hnsearch_search::{IndexLayout, Tier, VectorStore};

use crate::GlobalOptions;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {}

/// Execute the status command
pub fn execute(_args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let config = global.load_config()?;
    let data_dir = config.data_dir();

    let layout = IndexLayout::new(&data_dir);
    let store = VectorStore::new(layout.clone());
    let corpus = CorpusStore::new(&data_dir);

    println!("Data directory: {}", data_dir.display());

    let main = store.count(Tier::Main)?;
    let incremental = store.count(Tier::Incremental)?;
    println!(
        "Main tier:        {} vectors ({})",
        main,
        present(layout.main_index().exists())
    );
    println!(
        "Incremental tier: {} vectors ({})",
        incremental,
        present(layout.incremental_index().exists())
    );

    let corpus_rows = if corpus.main_path().exists() {
        CorpusStore::count_rows(&corpus.main_path())?.to_string()
    } else {
        "absent".to_string()
    };
    println!("Corpus rows:      {}", corpus_rows);

    let pending = corpus.list_incremental()?;
    println!("Pending files:    {}", pending.len());

    let mirror_path = data_dir.join(MIRROR_FILE);
    let mirror_rows = if mirror_path.exists() {
        Mirror::open_read_only(&mirror_path)?.count()?.to_string()
    } else {
        "absent".to_string()
    };
    println!("Mirror rows:      {}", mirror_rows);

    if layout.checkpoint().exists() {
        println!("Checkpoint:       present (interrupted ingest will resume)");
    } else {
        println!("Checkpoint:       none");
    }

    Ok(())
}

fn present(exists: bool) -> &'static str {
    if exists {
        "index on disk"
    } else {
        "no index file"
    }
}
