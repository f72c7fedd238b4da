//! Interactive REPL.

use crate::commands::{format_notification, format_records, parse_command_line};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tsquery_client::{QueryClient, QueryEvent};

const HELP_TEXT: &str = r#"
Any other input is sent to the server as a query command:
  <name> [key=value ...] [-flag ...]   e.g. clientlist -uid -away
                                       values may use \s for spaces,
                                       repeat a key for a multi-option

Local commands:
  help                          Show this help
  events on|off                 Print notifications as they arrive
  dedupe on|off                 Suppress repeated client view/move notifications
  json on|off                   Print records as JSON
  exit                          Send quit and leave the REPL
"#;

pub async fn run(client: QueryClient, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = client.config();
    println!("{}", "tsquery".bold().cyan());
    println!(
        "Connecting to {}:{} ({})...",
        config.host,
        config.port(),
        config.protocol
    );

    let show_events = Arc::new(AtomicBool::new(true));
    let mut events = client.subscribe();
    client.connect().await?;
    println!("{}", "Connected!".green());

    // Print notifications in the background
    let printer = {
        let show_events = show_events.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    QueryEvent::Notification(n) if show_events.load(Ordering::Relaxed) => {
                        println!("{}", format_notification(&n, false));
                    }
                    QueryEvent::Close { error } => {
                        match error {
                            Some(e) => println!("{}: {}", "Connection closed".red(), e),
                            None => println!("{}", "Connection closed".red()),
                        }
                        break;
                    }
                    _ => {}
                }
            }
        })
    };

    // Create readline editor
    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".tsquery_history"))
        .unwrap_or_else(|_| ".tsquery_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    let mut session = Session {
        client: &client,
        show_events: &show_events,
        json,
    };

    loop {
        if client.state().is_closed() {
            break;
        }
        let prompt = format!("{} ", "tsquery>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match session.execute(line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    // Disconnect
    if !client.state().is_closed() && client.quit().await.is_err() {
        client.force_quit().await;
    }
    printer.abort();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

struct Session<'a> {
    client: &'a QueryClient,
    show_events: &'a AtomicBool,
    json: bool,
}

impl Session<'_> {
    async fn execute(&mut self, line: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or_default().to_lowercase();
        let toggle = parts.next().map(parse_toggle);

        match (cmd.as_str(), toggle) {
            ("help" | "?", _) => Ok(Some(HELP_TEXT.to_string())),

            ("exit" | "quit" | "q", _) => Ok(None),

            ("events", Some(Some(on))) => {
                self.show_events.store(on, Ordering::Relaxed);
                Ok(Some(format!("notifications {}", on_off(on))))
            }

            ("dedupe", Some(Some(on))) => {
                self.client.set_duplicate_suppression(on);
                Ok(Some(format!("duplicate suppression {}", on_off(on))))
            }

            ("json", Some(Some(on))) => {
                self.json = on;
                Ok(Some(format!("JSON output {}", on_off(on))))
            }

            ("events" | "dedupe" | "json", _) => Ok(Some(format!("Usage: {} on|off", cmd))),

            _ => {
                let command = parse_command_line(line)?;
                let records = self.client.execute_list(command).await?;
                Ok(Some(format_records(&records, self.json)))
            }
        }
    }
}

fn parse_toggle(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn on_off(on: bool) -> colored::ColoredString {
    if on {
        "on".green()
    } else {
        "off".yellow()
    }
}
