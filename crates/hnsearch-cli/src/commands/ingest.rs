//! Ingest command - process pending incremental files

use anyhow::{Context, Result};
use clap::Args;
use hnsearch_search::{IndexParams, IngestPipeline, LocalEncoder, PipelineOptions};

use crate::progress;
use crate::GlobalOptions;

/// Arguments for the ingest command
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Force a full main-index rebuild
    #[arg(long)]
    pub(crate) rebuild: bool,

    /// Rebuild when the incremental tier exceeds this many vectors
    #[arg(long, value_name = "N")]
    pub(crate) rebuild_threshold: Option<u64>,

    /// Discard the checkpoint and incremental tier, then start fresh
    #[arg(long)]
    pub(crate) reset_checkpoint: bool,

    /// Skip embedding generation (debugging the store/mirror path only)
    #[arg(long)]
    pub(crate) skip_embeddings: bool,

    /// Texts per embedding batch
    #[arg(long, value_name = "N")]
    pub(crate) batch_size: Option<u32>,
}

/// Execute the ingest command
pub fn execute(args: IngestArgs, global: GlobalOptions) -> Result<()> {
    let config = global
        .load_config()?
        .with_overrides(hnsearch_config::ConfigOverrides {
            batch_size: args.batch_size,
            rebuild_threshold: args.rebuild_threshold,
            ..Default::default()
        });
    let data_dir = config.data_dir();

    let encoder = LocalEncoder::with_model(&config.embedding.model)
        .context("Failed to initialise the embedding encoder")?;

    let options = PipelineOptions {
        batch_size: config.embedding.batch_size as usize,
        checkpoint_every: config.ingest.checkpoint_every as usize,
        rebuild_threshold: config.ingest.rebuild_threshold,
        force_rebuild: args.rebuild,
        reset_checkpoint: args.reset_checkpoint,
        skip_embeddings: args.skip_embeddings,
        ..PipelineOptions::default()
    };
    let params = IndexParams {
        nlist_cap: config.index.nlist as usize,
        subquantizers: config.index.m as usize,
        nprobe: config.index.nprobe as usize,
        ..IndexParams::default()
    };

    let pipeline = IngestPipeline::new(&data_dir, &encoder, params, options);
    let spinner = progress::spinner("Ingesting incremental files...", global.quiet);
    match pipeline.run() {
        Ok(summary) => {
            progress::finish_spinner(
                spinner,
                &format!(
                    "Ingest complete: {} embedded, {} skipped, {} errors across {} file(s){}",
                    summary.embedded,
                    summary.skipped,
                    summary.errors,
                    summary.files,
                    if summary.rebuilt {
                        "; main index rebuilt"
                    } else {
                        ""
                    }
                ),
            );
            Ok(())
        }
        Err(e) => {
            progress::finish_spinner_error(spinner, "Ingest failed");
            Err(e).context("Ingestion failed")
        }
    }
}
