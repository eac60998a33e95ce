use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use emoji_contracts::entries::{EmojiList, EntryState};
use emoji_contracts::storage::FileStore;
use emoji_engine::{EmojiGenerator, EndpointClient, GeneratorController};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "emoji-rs", version, about = "Generate and collect emojis from a prompt")]
struct Cli {
    /// File that holds the cached emoji list.
    #[arg(long, global = true, default_value = "emoji-cache.json")]
    store: PathBuf,
    #[arg(
        long,
        global = true,
        default_value = "http://127.0.0.1:3000/api/generate-emoji"
    )]
    endpoint: String,
    /// Image URLs adopted when the cache is empty, instead of generating the default set.
    #[arg(long = "seed-url", global = true)]
    seed_urls: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    List,
    Generate(GenerateArgs),
    Like(PositionArgs),
    Download(DownloadArgs),
    Seed,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

#[derive(Debug, Parser)]
struct PositionArgs {
    /// 1-based position in the list, newest first.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    position: u64,
}

#[derive(Debug, Parser)]
struct DownloadArgs {
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    position: u64,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

type Controller = GeneratorController<EndpointClient, FileStore>;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("emoji-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let generator = EndpointClient::new(cli.endpoint.clone());
    let mut controller = Controller::open(generator, FileStore::new(&cli.store), &cli.seed_urls);
    if let Some(message) = controller.last_error() {
        eprintln!("{message}");
    }

    match cli.command {
        Command::List => {
            print_list(controller.entries());
            Ok(0)
        }
        Command::Generate(args) => run_generate(&mut controller, &args.prompt.join(" ")),
        Command::Like(args) => {
            let index = position_to_index(args.position)?;
            let liked = controller.toggle_like(index)?;
            println!(
                "{} emoji {}",
                if liked { "Liked" } else { "Unliked" },
                args.position
            );
            Ok(0)
        }
        Command::Download(args) => {
            let index = position_to_index(args.position)?;
            match controller.download(index, &args.out) {
                Some(path) => {
                    println!("Saved {}", path.display());
                    Ok(0)
                }
                None => {
                    eprintln!("Error downloading emoji {}", args.position);
                    Ok(1)
                }
            }
        }
        Command::Seed => run_seed(&mut controller),
    }
}

fn run_generate(controller: &mut Controller, prompt: &str) -> Result<i32> {
    let pending = controller.begin_generate(prompt)?;
    println!("Generating \"{}\"...", pending.prompt());
    let result = controller.generator().generate_emoji(pending.prompt());
    match controller.finish_generate(pending, result) {
        Ok(()) => {
            if let Some(url) = controller.entries().get(0).and_then(|entry| entry.image_url()) {
                println!("{url}");
            }
            Ok(0)
        }
        Err(err) => {
            eprintln!(
                "{}",
                controller
                    .last_error()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string())
            );
            Ok(1)
        }
    }
}

fn run_seed(controller: &mut Controller) -> Result<i32> {
    if controller.last_error().is_some() {
        return Ok(1);
    }
    if !controller.entries().is_empty() {
        print_list(controller.entries());
        return Ok(0);
    }
    if controller.seed().is_err() {
        if let Some(message) = controller.last_error() {
            eprintln!("{message}");
        }
        return Ok(1);
    }
    print_list(controller.entries());
    Ok(0)
}

fn position_to_index(position: u64) -> Result<usize> {
    let Ok(position) = usize::try_from(position) else {
        bail!("position {position} is out of range");
    };
    Ok(position.saturating_sub(1))
}

fn print_list(list: &EmojiList) {
    if list.is_empty() {
        println!("No emojis yet. Try `emoji-rs generate <prompt>`.");
        return;
    }
    for (idx, entry) in list.iter().enumerate() {
        let heart = if entry.is_liked { "♥" } else { " " };
        match &entry.state {
            EntryState::Resolved { image_url } => println!("{:>3}. {heart} {image_url}", idx + 1),
            EntryState::Pending { loading_step } => println!("{:>3}. {heart} {loading_step}", idx + 1),
        }
    }
}
