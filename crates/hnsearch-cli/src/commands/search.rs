//! Search command - semantic k-NN over the indexed corpus

use anyhow::{Context, Result};
use clap::Args;
use hnsearch_core::{display_preview, RecordKind};
use hnsearch_search::{LocalEncoder, SearchEngine};

use crate::GlobalOptions;

/// Characters of cleaned text shown per result
const PREVIEW_CHARS: usize = 250;

/// Arguments for the search command
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Natural language search query
    pub(crate) query: String,

    /// Maximum number of results to return
    #[arg(long, short = 'n', default_value = "10")]
    pub(crate) limit: usize,

    /// Filter by record kind (story, comment, job, poll)
    #[arg(long = "type", short = 't', value_name = "KIND")]
    pub(crate) kind: Option<RecordKind>,
}

/// Execute the search command
pub fn execute(args: SearchArgs, global: GlobalOptions) -> Result<()> {
    let config = global.load_config()?;
    let data_dir = config.data_dir();

    let encoder = LocalEncoder::with_model(&config.embedding.model)
        .context("Failed to initialise the embedding encoder")?;
    let engine =
        SearchEngine::open(&data_dir, Box::new(encoder)).context("Failed to open the index")?;

    let hits = engine
        .query(&args.query, args.limit, args.kind)
        .context("Search failed")?;

    if hits.is_empty() {
        if !global.quiet {
            eprintln!("No results found for: {}", args.query);
        }
        return Ok(());
    }

    // One line per result: id, kind, author, similarity, HN score, title,
    // url, and a cleaned text preview.
    for hit in &hits {
        let score = hit
            .score_hn
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let title = hit.title.as_deref().unwrap_or("-");
        let url = hit.url.as_deref().unwrap_or("-");
        let preview = hit
            .text
            .as_deref()
            .map(|t| display_preview(t, PREVIEW_CHARS))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{:.4}\t{}\t{}\t{}\t{}",
            hit.id, hit.kind, hit.author, hit.similarity, score, title, url, preview
        );
    }
    Ok(())
}
