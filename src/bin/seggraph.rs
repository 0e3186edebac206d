//! Binary entry point for the seggraph loader CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use seggraph::{
    cli::{
        import::{run_import, write_adjacency, EdgeImportConfig, ImportSummary},
        logging::init_logging,
    },
    storage::{GraphConfigFile, SegGraph},
    types::{Dir, EpochId},
};

#[derive(Parser, Debug)]
#[command(
    name = "seggraph",
    version,
    about = "Load CSV edges into a segmented epoch-versioned graph",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "TOML graph configuration")]
    config: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(value_name = "CSV", help = "CSV file containing edges")]
    edges: PathBuf,

    #[arg(long, default_value = "src", help = "Edge source column name")]
    src_column: String,

    #[arg(long, default_value = "dst", help = "Edge destination column name")]
    dst_column: String,

    #[arg(long, help = "Column containing edge label names")]
    label_column: Option<String>,

    #[arg(long, help = "Constant edge label if no column is provided")]
    label: Option<String>,

    #[arg(long, default_value_t = 4096, help = "Rows per commit")]
    batch_size: usize,
}

impl ImportArgs {
    fn config(&self) -> EdgeImportConfig {
        EdgeImportConfig {
            path: self.edges.clone(),
            src_column: self.src_column.clone(),
            dst_column: self.dst_column.clone(),
            label_column: self.label_column.clone(),
            static_label: self.label.clone(),
            batch_size: self.batch_size,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import edges, then print the adjacency visible at an epoch.
    Load {
        #[command(flatten)]
        import: ImportArgs,

        #[arg(long, help = "Snapshot epoch to print (defaults to the last commit)")]
        epoch: Option<EpochId>,
    },
    /// Import edges, then report allocator and chain statistics.
    Stats {
        #[command(flatten)]
        import: ImportArgs,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let opts = GraphConfigFile::load(&cli.config)?.into_options()?;
    let graph = SegGraph::open(opts)?;
    let mut worker = graph.register_worker();

    match cli.command {
        Command::Load { import, epoch } => {
            let summary = run_import(&graph, &mut worker, &import.config())?;
            let epoch = epoch.unwrap_or(summary.last_epoch);
            let stdout = io::stdout();
            let rows = write_adjacency(&graph, epoch, stdout.lock())?;
            eprintln!(
                "loaded {} edges in {} commits; printed {rows} edges at epoch {epoch}",
                summary.edges_imported, summary.commits
            );
        }
        Command::Stats { import } => {
            let summary = run_import(&graph, &mut worker, &import.config())?;
            print_stats(&graph, &summary, io::stdout().lock())?;
        }
    }
    graph.retire_worker(worker);
    Ok(())
}

fn print_stats(
    graph: &SegGraph,
    summary: &ImportSummary,
    mut out: impl Write,
) -> Result<(), Box<dyn Error>> {
    let usage = graph.block_usage();
    writeln!(out, "Import")?;
    writeln!(out, "  edges imported : {}", summary.edges_imported)?;
    writeln!(out, "  skipped remote : {}", summary.skipped_remote)?;
    writeln!(out, "  commits        : {}", summary.commits)?;
    writeln!(out, "Engine")?;
    writeln!(out, "  current epoch  : {}", graph.current_epoch())?;
    writeln!(out, "  vertices       : {}", graph.vertex_count())?;
    writeln!(out, "Allocator")?;
    writeln!(out, "  used bytes     : {}", usage.used_bytes)?;
    writeln!(out, "  reserved bytes : {}", usage.reserved_bytes)?;
    writeln!(out, "  capacity       : {}", usage.capacity)?;
    writeln!(out, "  exhausted      : {}", usage.exhausted)?;
    writeln!(out, "  free bytes     : {}", usage.free.free_bytes)?;
    for (order, count) in &usage.free.global_by_order {
        writeln!(out, "    order {order:>2}     : {count}")?;
    }

    let mut chains = 0usize;
    let mut blocks = 0usize;
    let mut entries = 0u64;
    let mut index_pairs = 0usize;
    for vertex in 0..graph.vertex_count() {
        for def in &graph.schema().edge_labels {
            for dir in [Dir::Out, Dir::In] {
                let stats = graph.verify_chain(vertex, def.id, dir)?;
                if stats.blocks == 0 {
                    continue;
                }
                chains += 1;
                blocks += stats.blocks;
                entries += stats.committed;
                index_pairs += stats.index_pairs;
            }
        }
    }
    writeln!(out, "Chains (verified)")?;
    writeln!(out, "  chains         : {chains}")?;
    writeln!(out, "  blocks         : {blocks}")?;
    writeln!(out, "  entries        : {entries}")?;
    writeln!(out, "  index pairs    : {index_pairs}")?;
    Ok(())
}
