//! dirq - inspect directories through the attribute scheduler
//!
//! Usage:
//!   dirq list /path/to/dir --attrs info,count,text
//!   dirq watch /path/to/dir
//!   dirq count /path/to/dir

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dirq_config::logging::{init_logging, LogLevel};
use dirq_config::Config;
use dirq_core::subscription::{DirectoryCallback, FileCallback};
use dirq_core::{
    ClientId, DirectoryEvent, DirectoryId, File, FileAttributes, FileId, LocalBackend, ReadyHandler, Scheduler,
    SchedulerConfig,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "dirq")]
#[command(version, about = "Directory attribute-fetch scheduler", long_about = None)]
struct Cli {
    /// Ceiling on concurrent attribute jobs
    #[arg(long, env = "DIRQ_MAX_JOBS")]
    max_jobs: Option<usize>,

    /// Include hidden and backup entries
    #[arg(long)]
    show_hidden: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a directory once and print its files
    List {
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// Attributes to fetch for each file
        #[arg(long, value_delimiter = ',', default_value = "info")]
        attrs: Vec<Attr>,
    },

    /// Keep a directory monitored and print changes until interrupted
    Watch {
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        #[arg(long, value_delimiter = ',', default_value = "info")]
        attrs: Vec<Attr>,
    },

    /// Recursively count a directory
    Count {
        #[arg(value_name = "DIR")]
        directory: PathBuf,
    },

    /// Print the default configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Attr {
    Info,
    Link,
    Count,
    Deep,
    Mime,
    Text,
    LargeText,
    Extension,
    Thumbnail,
    Mount,
    Fs,
}

impl Attr {
    fn flag(self) -> FileAttributes {
        match self {
            Attr::Info => FileAttributes::INFO,
            Attr::Link => FileAttributes::LINK_INFO,
            Attr::Count => FileAttributes::DIRECTORY_ITEM_COUNT,
            Attr::Deep => FileAttributes::DEEP_COUNTS,
            Attr::Mime => FileAttributes::DIRECTORY_ITEM_MIME_TYPES,
            Attr::Text => FileAttributes::TOP_LEFT_TEXT,
            Attr::LargeText => FileAttributes::LARGE_TOP_LEFT_TEXT,
            Attr::Extension => FileAttributes::EXTENSION_INFO,
            Attr::Thumbnail => FileAttributes::THUMBNAIL,
            Attr::Mount => FileAttributes::MOUNT,
            Attr::Fs => FileAttributes::FILESYSTEM_INFO,
        }
    }
}

fn attributes(attrs: &[Attr]) -> FileAttributes {
    attrs.iter().fold(FileAttributes::NONE, |acc, a| acc | a.flag())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn });

    let mut config = Config::load().unwrap_or_default();
    if let Some(n) = cli.max_jobs {
        config.scheduler.max_jobs = n;
    }
    if cli.show_hidden {
        config.visibility.show_hidden_files = true;
    }

    match cli.command {
        Commands::List { directory, attrs } => list(&config, directory, attributes(&attrs)).await,
        Commands::Watch { directory, attrs } => watch(&config, directory, attributes(&attrs)).await,
        Commands::Count { directory } => count(&config, directory).await,
        Commands::Config => {
            print!("{}", Config::default_toml());
            Ok(())
        }
    }
}

fn open(config: &Config) -> Result<Scheduler> {
    let backend = LocalBackend::new(config.thumbnails.cache_dir.clone()).context("Failed to start local backend")?;
    Ok(Scheduler::new(SchedulerConfig::from(config), Rc::new(backend)))
}

fn resolve(path: PathBuf) -> Result<PathBuf> {
    if !path.exists() {
        anyhow::bail!("Path does not exist: {}", path.display());
    }
    path.canonicalize().context("Failed to canonicalize path")
}

async fn list(config: &Config, directory: PathBuf, attrs: FileAttributes) -> Result<()> {
    let directory = resolve(directory)?;
    let scheduler = open(config)?;
    let dir = scheduler.directory_get(&directory)?;

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    let callback: DirectoryCallback = Rc::new(move |_: &Scheduler, _: DirectoryId, _: &[FileId]| flag.set(true));
    scheduler.call_when_ready(dir, ReadyHandler::WholeDirectory(Some(callback)), attrs, true)?;
    scheduler.run_until(|_| done.get()).await;

    for file in scheduler.directory_files(dir) {
        if let Some(line) = scheduler.with_file(file, describe) {
            println!("{line}");
        }
    }
    scheduler.directory_unref(dir);
    Ok(())
}

async fn watch(config: &Config, directory: PathBuf, attrs: FileAttributes) -> Result<()> {
    let directory = resolve(directory)?;
    let scheduler = open(config)?;
    let dir = scheduler.directory_get(&directory)?;
    let mut events = scheduler.subscribe();
    scheduler.monitor_add(dir, None, ClientId(1), false, attrs)?;
    info!(path = %directory.display(), "Watching directory");

    let printer = scheduler.clone();
    let run = scheduler.run_until(move |_| {
        while let Ok(event) = events.try_recv() {
            print_event(&printer, &event);
        }
        false
    });
    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    scheduler.monitor_remove(dir, None, ClientId(1))?;
    scheduler.directory_unref(dir);
    Ok(())
}

async fn count(config: &Config, directory: PathBuf) -> Result<()> {
    let directory = resolve(directory)?;
    let scheduler = open(config)?;
    let file = scheduler.file_get(&directory)?;
    let dir = scheduler
        .with_file(file, File::directory)
        .context("File vanished while opening")?;
    let mut events = scheduler.subscribe();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    let callback: FileCallback = Rc::new(move |_: &Scheduler, _: FileId| flag.set(true));
    scheduler.call_when_ready(
        dir,
        ReadyHandler::SingleFile(file, Some(callback)),
        FileAttributes::INFO | FileAttributes::DEEP_COUNTS,
        false,
    )?;
    scheduler
        .run_until(|_| {
            while let Ok(event) = events.try_recv() {
                if let DirectoryEvent::DeepCountProgress { counts, .. } = event {
                    eprint!("\r{} files, {} directories...", counts.files, counts.directories);
                }
            }
            done.get()
        })
        .await;
    eprintln!();

    if let Some(counts) = scheduler.with_file(file, |f| *f.deep_counts()) {
        println!(
            "{} files, {} directories, {} hidden, {} unreadable, {} bytes",
            counts.files, counts.directories, counts.hidden, counts.unreadable, counts.size
        );
    }
    scheduler.file_unref(file);
    Ok(())
}

fn describe(file: &File) -> String {
    let mut line = format!("{:<32}", file.name());
    if let Some(info) = file.info().value() {
        line.push_str(&format!(" {:>10}", info.size));
        if let Some(mime) = &info.content_type {
            line.push_str(&format!(" {mime}"));
        }
    } else if let Some(error) = file.get_info_error() {
        line.push_str(&format!(" ({error})"));
    }
    if let Some(count) = file.directory_count().value() {
        line.push_str(&format!(" [{count} items]"));
    }
    if let Some(text) = file.top_left_text().value() {
        if let Some(first) = text.lines().next() {
            line.push_str(&format!(" \"{first}\""));
        }
    }
    if let Some(link) = file.link_info().value() {
        if let Some(target) = &link.target {
            line.push_str(&format!(" -> {target}"));
        }
    }
    line
}

fn print_event(scheduler: &Scheduler, event: &DirectoryEvent) {
    let name = |file| scheduler.with_file(file, |f| f.name().to_string()).unwrap_or_default();
    match event {
        DirectoryEvent::FilesAdded { files, .. } => {
            for file in files {
                println!("+ {}", name(*file));
            }
        }
        DirectoryEvent::FilesChanged { files, .. } => {
            for file in files {
                let gone = scheduler.with_file(*file, File::is_gone).unwrap_or(true);
                println!("{} {}", if gone { "-" } else { "~" }, name(*file));
            }
        }
        DirectoryEvent::DoneLoading { .. } => println!("= loaded"),
        DirectoryEvent::LoadError { error, .. } => println!("! {error}"),
        DirectoryEvent::DeepCountProgress { .. } => {}
    }
}
