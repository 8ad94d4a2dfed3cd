use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use discord_broadcaster::commands::{self, SendOptions, StatusPrinter};
use discord_broadcaster::config;
use discord_broadcaster::environment;
use discord_broadcaster::profiles::{JsonFileStore, ProfileStore};
use discord_broadcaster::protocol::Target;

#[derive(Parser, Debug)]
#[command(name = "discord-broadcaster", version, about = "Broadcast a message to many Discord channels")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send the active profile's targets
    Send {
        /// Validate and walk the targets without contacting Discord
        #[arg(long)]
        preview: bool,
        /// Use this profile instead of the active one
        #[arg(long)]
        profile: Option<String>,
        /// Discord user token (falls back to $DISCORD_TOKEN, then the saved token)
        #[arg(long)]
        token: Option<String>,
        /// Remember the token for later runs
        #[arg(long)]
        save_token: bool,
    },
    /// Dry run: same as `send --preview`
    Preview {
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// Manage profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Manage targets of the active profile
    #[command(subcommand)]
    Target(TargetCommand),
    /// Set or clear the fallback image of the active profile
    #[command(subcommand)]
    Image(ImageCommand),
    /// Manage the saved token
    #[command(subcommand)]
    Token(TokenCommand),
    /// Check that the delivery worker is installed and usable
    CheckEnv,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List,
    Switch { name: String },
    /// Save the active profile's targets under a new name
    Save { name: String },
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum TargetCommand {
    List,
    Add {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        image: String,
    },
    /// Remove a target by its number as shown by `target list`
    Remove { number: usize },
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    Set { path: String },
    Clear,
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    Forget,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("Failed to load configuration")?;

    env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();

    log::debug!("Starting Discord Broadcaster v{}", env!("CARGO_PKG_VERSION"));

    let store = JsonFileStore::open_default().context("Failed to open profile store")?;

    match cli.command {
        Command::Send {
            preview,
            profile,
            token,
            save_token,
        } => {
            run_send(
                &store,
                &config,
                SendOptions {
                    preview,
                    profile,
                    token,
                    save_token,
                },
            )
            .await?
        }
        Command::Preview { profile, token } => {
            run_send(
                &store,
                &config,
                SendOptions {
                    preview: true,
                    profile,
                    token,
                    save_token: false,
                },
            )
            .await?
        }
        Command::CheckEnv => {
            let (report, warning) = commands::check_environment(&config).await;
            match warning {
                Some(text) => {
                    eprintln!("{}", text);
                    std::process::exit(1);
                }
                None => println!("Worker OK (v{})", report.runtime_version),
            }
        }
        Command::Profile(cmd) => run_profile(&store, cmd)?,
        Command::Target(cmd) => run_target(&store, cmd)?,
        Command::Image(cmd) => {
            let mut data = store.load()?;
            match cmd {
                ImageCommand::Set { path } => data.set_global_image(&path),
                ImageCommand::Clear => data.set_global_image(""),
            }
            store.save(&data)?;
            println!("Global image: {}", display_or_none(&data.active().global_image));
        }
        Command::Token(TokenCommand::Forget) => {
            let mut data = store.load()?;
            if data.forget_token() {
                store.save(&data)?;
                println!("Saved token deleted.");
            } else {
                println!("No saved token.");
            }
        }
    }

    Ok(())
}

async fn run_send(
    store: &JsonFileStore,
    config: &config::Config,
    options: SendOptions,
) -> anyhow::Result<()> {
    // A failed probe is a warning only; the broadcast itself reports the real error.
    let (_, warning) = commands::check_environment(config).await;
    if let Some(text) = warning {
        eprintln!("{}", text);
    }

    let worker_path = environment::resolve_worker_path(config)?;

    if options.preview {
        println!("Running preview (no messages will be sent)...");
    } else {
        println!("Starting broadcast process...");
    }

    let printer = StatusPrinter::new(std::io::stdout());
    match commands::send_broadcast(store, config, &worker_path, options, printer).await {
        Ok((outcome, _)) => {
            if outcome.done.is_none() {
                bail!("Broadcast ended without a summary");
            }
            Ok(())
        }
        Err(e) => bail!("Broadcast failed to start: {}", e),
    }
}

fn run_profile(store: &JsonFileStore, cmd: ProfileCommand) -> anyhow::Result<()> {
    let mut data = store.load()?;
    match cmd {
        ProfileCommand::List => {
            for name in data.names() {
                let marker = if name == data.active_profile { "*" } else { " " };
                println!("{} {}", marker, name);
            }
            return Ok(());
        }
        ProfileCommand::Switch { name } => {
            data.switch(&name)?;
            println!("Switched to profile: {}", name);
        }
        ProfileCommand::Save { name } => {
            let current = data.active().clone();
            data.save_as(&name, current.targets, &current.global_image)?;
            println!("Profile \"{}\" saved!", name.trim());
        }
        ProfileCommand::Delete { name } => {
            data.delete(&name)?;
            println!("Profile \"{}\" deleted.", name);
        }
    }
    store.save(&data)?;
    Ok(())
}

fn run_target(store: &JsonFileStore, cmd: TargetCommand) -> anyhow::Result<()> {
    let mut data = store.load()?;
    match cmd {
        TargetCommand::List => {
            let lines = commands::list_targets(&data);
            if lines.is_empty() {
                println!("No targets in profile \"{}\".", data.active_profile);
            }
            for line in lines {
                println!("{}", line);
            }
            return Ok(());
        }
        TargetCommand::Add {
            channel,
            message,
            role,
            name,
            image,
        } => {
            let number = data.add_target(Target {
                channel_id: channel.trim().to_string(),
                role_id: role.trim().to_string(),
                message: message.trim().to_string(),
                name: name.trim().to_string(),
                image_path: image.trim().to_string(),
            });
            println!("Added Target #{}", number);
        }
        TargetCommand::Remove { number } => {
            let removed = data.remove_target(number)?;
            println!("Removed Target #{} ({})", number, removed.label());
        }
    }
    store.save(&data)?;
    Ok(())
}

fn display_or_none(value: &str) -> &str {
    if value.is_empty() {
        "(none)"
    } else {
        value
    }
}
