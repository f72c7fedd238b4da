//! tsquery - command-line client for the ServerQuery interface
//!
//! Provides a REPL, one-shot command execution, notification watching and
//! file transfer.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tsquery_client::{ConnectionConfig, QueryClient, QueryEvent, QueryProtocol};

#[derive(Parser)]
#[command(name = "tsquery")]
#[command(about = "Command-line client for the ServerQuery administration interface")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "TSQUERY_CONFIG")]
    config: Option<PathBuf>,

    /// Server host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Query port (defaults to 10011 for raw, 10022 for ssh)
    #[arg(short, long)]
    port: Option<u16>,

    /// Transport protocol: raw or ssh
    #[arg(long)]
    protocol: Option<QueryProtocol>,

    /// Query login name
    #[arg(short, long)]
    username: Option<String>,

    /// Query login password
    #[arg(long)]
    password: Option<String>,

    /// Virtual server to select, by voice port
    #[arg(short = 's', long)]
    server_port: Option<u16>,

    /// Nickname to use on the virtual server
    #[arg(short, long)]
    nickname: Option<String>,

    /// Print records and events as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Execute one command, e.g. `exec clientlist -uid`
    Exec {
        /// Command line (name, key=value options, -flags)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },

    /// Register for notifications and print them until interrupted
    Watch {
        /// Notification families (server, channel, textserver, textchannel, textprivate)
        #[arg(short, long, value_delimiter = ',', default_value = "server")]
        event: Vec<String>,

        /// Channel id for the channel family
        #[arg(long, default_value = "0")]
        channel_id: u64,

        /// Print repeated client view/move notifications too
        #[arg(long)]
        no_dedupe: bool,
    },

    /// Upload a local file to a channel
    Upload {
        /// Local file
        local: PathBuf,

        /// Remote path, e.g. /icons/logo.png
        remote: String,

        /// Channel id (0 for server-wide files)
        #[arg(long, default_value = "0")]
        cid: u64,

        /// Channel password
        #[arg(long, default_value = "")]
        cpw: String,
    },

    /// Download a file from a channel
    Download {
        /// Remote path
        remote: String,

        /// Local file
        local: PathBuf,

        /// Channel id (0 for server-wide files)
        #[arg(long, default_value = "0")]
        cid: u64,

        /// Channel password
        #[arg(long, default_value = "")]
        cpw: String,
    },
}

impl Cli {
    /// Builds the connection config: file, then environment, then flags.
    fn connection_config(&self) -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = ConnectionConfig::from_file(path)?;
                config.apply_env_overrides();
                tracing::debug!("loaded config from {}", path.display());
                config
            }
            None => ConnectionConfig::load()?,
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(port) = self.port {
            config.query_port = Some(port);
        }
        if let Some(username) = &self.username {
            config.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(port) = self.server_port {
            config.server_port = Some(port);
        }
        if let Some(nickname) = &self.nickname {
            config.nickname = Some(nickname.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.connection_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };
    let client = QueryClient::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, cli.json).await?;
        }
        Some(Commands::Watch {
            event,
            channel_id,
            no_dedupe,
        }) => {
            // Subscribe before connecting so no notification is missed
            let mut events = client.subscribe();
            connect(&client).await?;
            if no_dedupe {
                client.set_duplicate_suppression(false);
            }

            for family in &event {
                let id = (family == "channel").then_some(channel_id);
                if let Err(e) = client.register_notifications(family, id).await {
                    eprintln!("{}: {}", "Error".red(), e);
                    client.force_quit().await;
                    std::process::exit(1);
                }
            }
            eprintln!(
                "{} {} notifications",
                "Watching".green(),
                event.join(", ").cyan()
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    received = events.recv() => {
                        match received {
                            Ok(QueryEvent::Notification(n)) => {
                                println!("{}", commands::format_notification(&n, cli.json));
                            }
                            Ok(QueryEvent::Close { error }) => {
                                match error {
                                    Some(e) => eprintln!("{}: {}", "Connection closed".red(), e),
                                    None => eprintln!("{}", "Connection closed".red()),
                                }
                                break;
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }

            disconnect(&client).await;
        }
        Some(cmd) => {
            connect(&client).await?;

            let result = commands::execute(&client, cmd, cli.json).await;
            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    client.force_quit().await;
                    std::process::exit(1);
                }
            }

            disconnect(&client).await;
        }
    }

    Ok(())
}

async fn connect(client: &QueryClient) -> Result<(), Box<dyn std::error::Error>> {
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    Ok(())
}

/// Sends `quit`, falling back to closing the transport.
async fn disconnect(client: &QueryClient) {
    if let Err(e) = client.quit().await {
        tracing::debug!("quit failed: {}", e);
        client.force_quit().await;
    }
}
