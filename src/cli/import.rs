use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::SegGraphError;
use crate::storage::{DataType, EdgeLabelDef, SegGraph, Worker};
use crate::types::{Dir, EpochId, LabelId, VertexId};

const DEFAULT_BATCH_SIZE: usize = 4096;

/// Configuration for loading edges from a CSV file.
#[derive(Debug, Clone)]
pub struct EdgeImportConfig {
    /// Path to the CSV file.
    pub path: PathBuf,
    /// Column holding numeric source vertex ids.
    pub src_column: String,
    /// Column holding numeric destination vertex ids.
    pub dst_column: String,
    /// Column holding the edge label name.
    pub label_column: Option<String>,
    /// Label applied to every row when no label column is given.
    pub static_label: Option<String>,
    /// Rows per batch-loader commit.
    pub batch_size: usize,
}

impl EdgeImportConfig {
    /// Defaults: `src`/`dst` columns, one commit per 4096 rows.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            src_column: "src".into(),
            dst_column: "dst".into(),
            label_column: None,
            static_label: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Counters from one import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows turned into edges.
    pub edges_imported: u64,
    /// Rows whose source belongs to another partition.
    pub skipped_remote: u64,
    /// Batch commits performed.
    pub commits: u64,
    /// Epoch of the final commit.
    pub last_epoch: EpochId,
}

/// Error type for CLI operations.
#[derive(Error, Debug)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV parsing or writing error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// Storage engine error.
    #[error(transparent)]
    Storage(#[from] SegGraphError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Loads the CSV file named by `cfg`.
pub fn run_import(
    graph: &SegGraph,
    worker: &mut Worker,
    cfg: &EdgeImportConfig,
) -> Result<ImportSummary, CliError> {
    let file = File::open(&cfg.path)?;
    let summary = import_edges(graph, worker, cfg, file)?;
    info!(
        path = %cfg.path.display(),
        edges = summary.edges_imported,
        skipped = summary.skipped_remote,
        commits = summary.commits,
        epoch = summary.last_epoch,
        "cli.import.done"
    );
    Ok(summary)
}

/// Loads edges from any CSV source with a header row.
///
/// Property columns are matched to the label's properties by name; missing
/// or empty cells encode as zero bytes. Rows are committed through a batch
/// loader every `batch_size` rows.
pub fn import_edges<R: Read>(
    graph: &SegGraph,
    worker: &mut Worker,
    cfg: &EdgeImportConfig,
    source: R,
) -> Result<ImportSummary, CliError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(source);
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| CliError::Message(format!("missing column {name:?}")))
    };
    let src_idx = column(&cfg.src_column)?;
    let dst_idx = column(&cfg.dst_column)?;
    let label_idx = cfg.label_column.as_deref().map(column).transpose()?;
    let schema = graph.schema();
    let static_label = match (&cfg.static_label, label_idx) {
        (Some(name), _) => Some(
            schema
                .label_id(name)
                .ok_or_else(|| CliError::Message(format!("unknown edge label {name:?}")))?,
        ),
        (None, None) if schema.label_count() == 1 => Some(0),
        (None, None) => {
            return Err("schema has several edge labels; pass a label column or a label".into())
        }
        (None, Some(_)) => None,
    };

    let mut layouts: HashMap<LabelId, Vec<(Option<usize>, usize)>> = HashMap::new();
    let mut summary = ImportSummary::default();
    let partition = graph.partition();
    let batch = cfg.batch_size.max(1);
    let mut in_batch = 0;
    let mut record = StringRecord::new();
    let mut txn = graph.begin_batch_loader(worker);

    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let src = parse_vertex(&record, src_idx, line)?;
        let dst = parse_vertex(&record, dst_idx, line)?;
        let label = match (static_label, label_idx) {
            (Some(label), _) => label,
            (None, Some(idx)) => {
                let name = record.get(idx).unwrap_or_default();
                schema.label_id(name).ok_or_else(|| {
                    CliError::Message(format!("line {line}: unknown edge label {name:?}"))
                })?
            }
            (None, None) => 0,
        };
        if !partition.is_local(src) {
            summary.skipped_remote += 1;
            continue;
        }
        let def = schema
            .label(label)
            .ok_or_else(|| CliError::Message(format!("line {line}: bad label id {label}")))?;
        let layout = layouts.entry(label).or_insert_with(|| {
            def.props
                .iter()
                .enumerate()
                .map(|(i, p)| (headers.iter().position(|h| h == p.name), i))
                .collect()
        });
        let data = encode_record(def, layout, &record, line)?;
        txn.add_edge(src, dst, label, &data)?;
        summary.edges_imported += 1;
        in_batch += 1;
        if in_batch >= batch {
            summary.last_epoch = txn.commit()?;
            summary.commits += 1;
            debug!(epoch = summary.last_epoch, rows = in_batch, "cli.import.batch");
            in_batch = 0;
            txn = graph.begin_batch_loader(worker);
        }
    }
    if in_batch > 0 {
        summary.last_epoch = txn.commit()?;
        summary.commits += 1;
    } else {
        txn.abort();
    }
    Ok(summary)
}

fn parse_vertex(record: &StringRecord, idx: usize, line: u64) -> Result<VertexId, CliError> {
    let raw = record.get(idx).unwrap_or_default();
    raw.parse()
        .map_err(|_| CliError::Message(format!("line {line}: invalid vertex id {raw:?}")))
}

fn encode_record(
    def: &EdgeLabelDef,
    layout: &[(Option<usize>, usize)],
    record: &StringRecord,
    line: u64,
) -> Result<Vec<u8>, CliError> {
    let mut data = vec![0u8; def.prop_size];
    for &(column, prop_idx) in layout {
        let prop = &def.props[prop_idx];
        let Some(raw) = column.and_then(|c| record.get(c)).filter(|s| !s.is_empty()) else {
            continue;
        };
        let bytes = encode_value(prop.dtype, raw).map_err(|e| {
            CliError::Message(format!("line {line}: property {:?}: {e}", prop.name))
        })?;
        data[prop.range()].copy_from_slice(&bytes);
    }
    Ok(data)
}

/// Encodes one textual value as the fixed-width bytes of `dtype`.
pub fn encode_value(dtype: DataType, raw: &str) -> Result<Vec<u8>, String> {
    fn parse<T: std::str::FromStr>(raw: &str) -> Result<T, String> {
        raw.parse().map_err(|_| format!("cannot parse {raw:?}"))
    }
    Ok(match dtype {
        DataType::Bool => match raw {
            "true" | "1" => vec![1],
            "false" | "0" => vec![0],
            _ => return Err(format!("cannot parse {raw:?} as bool")),
        },
        DataType::I32 | DataType::Date => parse::<i32>(raw)?.to_le_bytes().to_vec(),
        DataType::U32 => parse::<u32>(raw)?.to_le_bytes().to_vec(),
        DataType::I64 | DataType::DateTime => parse::<i64>(raw)?.to_le_bytes().to_vec(),
        DataType::U64 => parse::<u64>(raw)?.to_le_bytes().to_vec(),
        DataType::F32 => parse::<f32>(raw)?.to_le_bytes().to_vec(),
        DataType::F64 => parse::<f64>(raw)?.to_le_bytes().to_vec(),
    })
}

/// Renders fixed-width property bytes back to text.
pub fn format_value(dtype: DataType, bytes: &[u8]) -> String {
    fn arr<const N: usize>(bytes: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        let n = bytes.len().min(N);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }
    match dtype {
        DataType::Bool => (bytes.first().copied().unwrap_or(0) != 0).to_string(),
        DataType::I32 | DataType::Date => i32::from_le_bytes(arr(bytes)).to_string(),
        DataType::U32 => u32::from_le_bytes(arr(bytes)).to_string(),
        DataType::I64 | DataType::DateTime => i64::from_le_bytes(arr(bytes)).to_string(),
        DataType::U64 => u64::from_le_bytes(arr(bytes)).to_string(),
        DataType::F32 => f32::from_le_bytes(arr(bytes)).to_string(),
        DataType::F64 => f64::from_le_bytes(arr(bytes)).to_string(),
    }
}

/// Writes every outgoing edge visible at `read_epoch` as CSV.
///
/// Columns: `src,label,dst,props` where `props` is `name=value` pairs
/// joined by `;`.
pub fn write_adjacency<W: Write>(
    graph: &SegGraph,
    read_epoch: EpochId,
    out: W,
) -> Result<u64, CliError> {
    let mut writer = WriterBuilder::new().from_writer(out);
    writer.write_record(["src", "label", "dst", "props"])?;
    let reader = graph.create_graph_reader(read_epoch);
    let mut rows = 0;
    for vertex in 0..graph.vertex_count() {
        for def in &graph.schema().edge_labels {
            let mut iter = reader.edges(vertex, def.id, Dir::Out)?;
            while iter.valid() {
                let props = def
                    .props
                    .iter()
                    .map(|p| format!("{}={}", p.name, format_value(p.dtype, iter.edge_property(p))))
                    .collect::<Vec<_>>()
                    .join(";");
                writer.write_record([
                    vertex.to_string(),
                    def.name.clone(),
                    iter.dst_id().to_string(),
                    props,
                ])?;
                rows += 1;
                iter.next();
            }
        }
    }
    writer.flush()?;
    Ok(rows)
}
