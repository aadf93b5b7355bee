//! ColStep CLI - writes and reads a demonstration table
//!
//! `colstep write <table> [ranks]` writes one row per rank, every element kind
//! as a scalar column and as a 5×6 array column. `colstep read <table> [row]`
//! prints one row of every array column.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colstep_core::{
    config, Array, Complex32, Complex64, ColumnAccess, ColumnElement, ElementKind, EngineConfig,
    ProcessGroup, PropertyReader, PropertyWriter, StorageManager, ThreadGroup,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Row shape of every array column
const ARRAY_SHAPE: [u64; 2] = [5, 6];

/// Table-relative data file the manager is bound to
const DATA_FILE: &str = "table.f0";

/// Persisted manager descriptor
const DESCRIPTOR_FILE: &str = "table.dm";

/// Table-level metadata the host keeps alongside the manager
const INFO_FILE: &str = "table.info";

/// ColStep demonstration table writer and reader
#[derive(Parser, Debug)]
#[command(name = "colstep", version, about = "Write and read a ColStep demonstration table")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one row per rank, every rank a cooperating writer thread
    Write {
        /// Table directory
        #[arg(default_value = "colstep.table")]
        table: PathBuf,

        /// Number of writer ranks, which is also the row count
        #[arg(default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
        ranks: u16,
    },
    /// Print one row of every array column
    Read {
        /// Table directory
        #[arg(default_value = "colstep.table")]
        table: PathBuf,

        /// Row to print
        #[arg(default_value_t = 0)]
        row: u64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct TableInfo {
    rows: u64,
    manager: String,
}

/// Deterministic cell contents for a rank
trait Sample: ColumnElement + Debug {
    fn sample(rank: usize, index: usize) -> Self;
}

macro_rules! numeric_sample {
    ($($ty:ty),*) => {
        $(
            impl Sample for $ty {
                fn sample(rank: usize, index: usize) -> Self {
                    (rank + index) as $ty
                }
            }
        )*
    };
}

numeric_sample!(u8, i16, u16, i32, u32, f32, f64);

impl Sample for bool {
    fn sample(rank: usize, index: usize) -> Self {
        (rank + index) % 2 == 1
    }
}

impl Sample for Complex32 {
    fn sample(rank: usize, index: usize) -> Self {
        Complex32::new(rank as f32, index as f32)
    }
}

impl Sample for Complex64 {
    fn sample(rank: usize, index: usize) -> Self {
        Complex64::new(rank as f64, index as f64)
    }
}

impl Sample for String {
    fn sample(rank: usize, index: usize) -> Self {
        format!("r{}i{}", rank, index)
    }
}

fn label(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Bool => "Bool",
        ElementKind::UInt8 => "uChar",
        ElementKind::Int16 => "Short",
        ElementKind::UInt16 => "uShort",
        ElementKind::Int32 => "Int",
        ElementKind::UInt32 => "uInt",
        ElementKind::Float32 => "Float",
        ElementKind::Float64 => "Double",
        ElementKind::Complex32 => "Complex",
        ElementKind::Complex64 => "DComplex",
        ElementKind::String => "String",
    }
}

/// Declare `scalar_<Kind>` and `array_<Kind>` for every kind; array shapes
/// are bound only when `shape` is given
fn declare_columns(manager: &mut StorageManager, shape: Option<&[u64]>) -> anyhow::Result<()> {
    for kind in ElementKind::ALL {
        manager.make_scalar_column(&format!("scalar_{}", label(kind)), kind.scalar_tag(), "")?;
    }
    for kind in ElementKind::ALL {
        let number =
            manager.make_dir_arr_column(&format!("array_{}", label(kind)), kind.array_tag(), "")?;
        if let Some(shape) = shape {
            manager.set_shape_column(number, shape)?;
        }
    }
    Ok(())
}

fn put_sample<T: Sample>(
    access: &mut ColumnAccess<'_>,
    row: u64,
    rank: usize,
) -> anyhow::Result<()> {
    if access.column().category().is_array() {
        let shape = access.shape(row)?;
        access.put_array(row, &Array::from_fn(shape, |i| T::sample(rank, i)))?;
    } else {
        access.put_scalar(row, T::sample(rank, 0))?;
    }
    Ok(())
}

fn fill(access: &mut ColumnAccess<'_>, row: u64, rank: usize) -> anyhow::Result<()> {
    match access.column().kind() {
        ElementKind::Bool => put_sample::<bool>(access, row, rank),
        ElementKind::UInt8 => put_sample::<u8>(access, row, rank),
        ElementKind::Int16 => put_sample::<i16>(access, row, rank),
        ElementKind::UInt16 => put_sample::<u16>(access, row, rank),
        ElementKind::Int32 => put_sample::<i32>(access, row, rank),
        ElementKind::UInt32 => put_sample::<u32>(access, row, rank),
        ElementKind::Float32 => put_sample::<f32>(access, row, rank),
        ElementKind::Float64 => put_sample::<f64>(access, row, rank),
        ElementKind::Complex32 => put_sample::<Complex32>(access, row, rank),
        ElementKind::Complex64 => put_sample::<Complex64>(access, row, rank),
        ElementKind::String => put_sample::<String>(access, row, rank),
    }
}

/// Write this rank's row; returns the manager descriptor
fn write_rank(table: &Path, group: ProcessGroup, rows: u64) -> anyhow::Result<Vec<u8>> {
    let rank = group.rank();
    let mut manager = StorageManager::with_group(EngineConfig::default(), group)?;
    manager.set_file_name(table.join(DATA_FILE));
    declare_columns(&mut manager, Some(&ARRAY_SHAPE))?;
    manager.create(rows)?;

    let row = rank as u64;
    for number in 0..manager.ncolumns() {
        fill(&mut manager.column(number)?, row, rank)?;
    }

    let mut out = PropertyWriter::new();
    manager.flush(&mut out, true)?;
    manager.close()?;
    Ok(out.into_bytes()?.to_vec())
}

async fn write(table: PathBuf, ranks: usize) -> anyhow::Result<()> {
    std::fs::create_dir_all(&table)
        .with_context(|| format!("creating table directory {:?}", table))?;
    let rows = ranks as u64;

    let handles: Vec<_> = ThreadGroup::new(ranks)
        .into_iter()
        .map(|group| {
            let table = table.clone();
            tokio::task::spawn_blocking(move || write_rank(&table, group, rows))
        })
        .collect();

    let mut descriptor = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        let bytes = handle
            .await
            .with_context(|| format!("rank {} panicked", rank))?
            .with_context(|| format!("rank {} failed", rank))?;
        if rank == 0 {
            descriptor = Some(bytes);
        }
    }
    let Some(descriptor) = descriptor else {
        bail!("no rank produced a manager descriptor");
    };

    std::fs::write(table.join(DESCRIPTOR_FILE), descriptor)?;
    let info = TableInfo {
        rows,
        manager: config::MANAGER_NAME.to_string(),
    };
    std::fs::write(table.join(INFO_FILE), serde_json::to_vec_pretty(&info)?)?;

    info!("Wrote {} rows to {:?}", rows, table);
    Ok(())
}

fn print_cell<T: Sample>(access: &mut ColumnAccess<'_>, row: u64) -> anyhow::Result<()> {
    let cell = access.get_array::<T>(row)?;
    println!();
    println!("Column: {}, Shape: {:?}", access.name(), cell.shape());
    let width = cell.shape().last().copied().unwrap_or(1).max(1) as usize;
    for line in cell.as_slice().chunks(width) {
        let values: Vec<String> = line.iter().map(|v| format!("{:?}", v)).collect();
        println!("{}", values.join("  "));
    }
    Ok(())
}

fn print_column(access: &mut ColumnAccess<'_>, row: u64) -> anyhow::Result<()> {
    match access.column().kind() {
        ElementKind::Bool => print_cell::<bool>(access, row),
        ElementKind::UInt8 => print_cell::<u8>(access, row),
        ElementKind::Int16 => print_cell::<i16>(access, row),
        ElementKind::UInt16 => print_cell::<u16>(access, row),
        ElementKind::Int32 => print_cell::<i32>(access, row),
        ElementKind::UInt32 => print_cell::<u32>(access, row),
        ElementKind::Float32 => print_cell::<f32>(access, row),
        ElementKind::Float64 => print_cell::<f64>(access, row),
        ElementKind::Complex32 => print_cell::<Complex32>(access, row),
        ElementKind::Complex64 => print_cell::<Complex64>(access, row),
        ElementKind::String => print_cell::<String>(access, row),
    }
}

fn read(table: &Path, row: u64) -> anyhow::Result<()> {
    let info: TableInfo = serde_json::from_slice(
        &std::fs::read(table.join(INFO_FILE))
            .with_context(|| format!("reading table info in {:?}", table))?,
    )?;
    if info.manager != config::MANAGER_NAME {
        bail!("table {:?} is managed by {}", table, info.manager);
    }

    let mut manager = StorageManager::new()?;
    manager.set_file_name(table.join(DATA_FILE));
    declare_columns(&mut manager, None)?;
    let mut input = PropertyReader::new(std::fs::read(table.join(DESCRIPTOR_FILE))?);
    manager.open(info.rows, &mut input)?;

    for number in 0..manager.ncolumns() {
        if manager.column_info(number)?.category().is_array() {
            print_column(&mut manager.column(number)?, row)?;
        }
    }
    manager.close()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Command::Write { table, ranks } => write(table, usize::from(ranks)).await,
        Command::Read { table, row } => {
            tokio::task::spawn_blocking(move || read(&table, row)).await?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_defaults_and_ranges() {
        let cli = Cli::try_parse_from(["colstep", "write"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Write { ref table, ranks: 4 } if table == Path::new("colstep.table")
        ));

        let cli = Cli::try_parse_from(["colstep", "read", "t", "3"]).unwrap();
        assert!(matches!(cli.command, Command::Read { row: 3, .. }));

        assert!(Cli::try_parse_from(["colstep", "write", "t", "0"]).is_err());
        assert!(Cli::try_parse_from(["colstep", "read", "t", "-1"]).is_err());
        assert!(Cli::try_parse_from(["colstep", "scan"]).is_err());
    }
}
