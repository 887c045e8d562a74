//! Offline inspection and repair of sylva tree files.
#![forbid(unsafe_code)]

mod config;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use sylva::storage::btree::BPlusTreeOptions;
use sylva::{BPlusTree, KeyCodec, ValCodec};
use tracing_subscriber::EnvFilter;

use config::{KeyType, TreeConfig, ValueType};

#[derive(Parser, Debug)]
#[command(
    name = "sylva",
    version,
    about = "Inspect, verify and recover sylva B+ tree files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "TOML", help = "Tree layout configuration")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, help = "Key encoding of the tree file")]
    key_type: Option<KeyType>,

    #[arg(long, global = true, value_enum, help = "Value encoding of the tree file")]
    value_type: Option<ValueType>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every entry in key order.
    Dump {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "Stop after this many entries")]
        limit: Option<usize>,
    },
    /// Print the number of entries.
    Count {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Rebuild a damaged file from its readable leaves.
    Recover {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Check the tree's structural invariants.
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

impl Command {
    fn file(&self) -> &Path {
        match self {
            Command::Dump { file, .. }
            | Command::Count { file }
            | Command::Recover { file }
            | Command::Verify { file } => file,
        }
    }
}

/// Human-readable form of a decoded key or value.
trait Render {
    fn render(&self) -> String;
}

impl Render for u64 {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }
}

impl Render for Vec<u8> {
    fn render(&self) -> String {
        self.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("SYLVA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = TreeConfig::load(cli.config.as_deref())?;
    let key_type = cli.key_type.or(config.key_type).unwrap_or_default();
    let value_type = cli.value_type.or(config.value_type).unwrap_or_default();

    match (key_type, value_type) {
        (KeyType::U64, ValueType::U64) => execute::<u64, u64>(&cli.command, &config),
        (KeyType::U64, ValueType::String) => execute::<u64, String>(&cli.command, &config),
        (KeyType::U64, ValueType::Bytes) => execute::<u64, Vec<u8>>(&cli.command, &config),
        (KeyType::String, ValueType::U64) => execute::<String, u64>(&cli.command, &config),
        (KeyType::String, ValueType::String) => execute::<String, String>(&cli.command, &config),
        (KeyType::String, ValueType::Bytes) => execute::<String, Vec<u8>>(&cli.command, &config),
        (KeyType::Bytes, ValueType::U64) => execute::<Vec<u8>, u64>(&cli.command, &config),
        (KeyType::Bytes, ValueType::String) => execute::<Vec<u8>, String>(&cli.command, &config),
        (KeyType::Bytes, ValueType::Bytes) => execute::<Vec<u8>, Vec<u8>>(&cli.command, &config),
    }
}

fn execute<K, V>(command: &Command, config: &TreeConfig) -> Result<(), Box<dyn Error>>
where
    K: KeyCodec + Ord + Render,
    V: ValCodec + Render,
{
    let options: BPlusTreeOptions<K, V> = config.options(command.file());
    match command {
        Command::Dump { limit, .. } => {
            let entries = BPlusTree::enumerate_file(&options)?;
            for entry in entries.take(limit.unwrap_or(usize::MAX)) {
                let (key, value) = entry?;
                println!("{}\t{}", key.render(), value.render());
            }
        }
        Command::Count { .. } => {
            let tree = BPlusTree::open(options.read_only(true))?;
            println!("{}", tree.count()?);
        }
        Command::Recover { file } => {
            let recovered = BPlusTree::recover_file(&options)?;
            if recovered == 0 {
                eprintln!("no readable entries in {}; file left untouched", file.display());
                process::exit(2);
            }
            println!("recovered {recovered} entries into {}", file.display());
        }
        Command::Verify { file } => {
            let tree = BPlusTree::open(options.read_only(true))?;
            match tree.validate() {
                Ok(report) => println!(
                    "ok: depth={} leaves={} interior={} entries={}",
                    report.depth, report.leaf_nodes, report.interior_nodes, report.entries
                ),
                Err(err) => {
                    eprintln!("{}: {err}", file.display());
                    process::exit(2);
                }
            }
        }
    }
    Ok(())
}
