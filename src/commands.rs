//! Command execution and output formatting.

use crate::Commands;
use chrono::Local;
use colored::Colorize;
use tsquery_client::{ClientError, QueryClient, Record};
use tsquery_protocol::{unescape, ArgValue, Command, Notification};

/// Client-side id for file transfers started by this tool.
const CLIENT_TRANSFER_ID: u32 = 1;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(
    client: &QueryClient,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Exec { line } => {
            let command = parse_command_line(&line.join(" "))?;
            let records = client.execute_list(command).await?;
            Ok(format_records(&records, json))
        }

        Commands::Upload {
            local,
            remote,
            cid,
            cpw,
        } => {
            let data = tokio::fs::read(&local).await?;
            let size = data.len();
            upload(client, &data, &remote, cid, &cpw).await?;
            Ok(format!(
                "{} {} to {} ({})",
                "Uploaded".green(),
                local.display(),
                remote_path(&remote).cyan(),
                format_bytes(size as u64)
            ))
        }

        Commands::Download {
            remote,
            local,
            cid,
            cpw,
        } => {
            let data = download(client, &remote, cid, &cpw).await?;
            tokio::fs::write(&local, &data).await?;
            Ok(format!(
                "{} {} to {} ({})",
                "Downloaded".green(),
                remote_path(&remote).cyan(),
                local.display(),
                format_bytes(data.len() as u64)
            ))
        }

        // REPL and watch are handled in main.rs
        Commands::Repl | Commands::Watch { .. } => Ok(String::new()),
    }
}

/// Requests an upload slot and streams `data` into it.
pub async fn upload(
    client: &QueryClient,
    data: &[u8],
    remote: &str,
    cid: u64,
    cpw: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = client
        .execute(
            Command::new("ftinitupload")
                .arg("clientftfid", CLIENT_TRANSFER_ID)
                .arg("name", remote_path(remote))
                .arg("cid", cid)
                .arg("cpw", cpw)
                .arg("size", data.len())
                .arg("overwrite", true)
                .arg("resume", false),
        )
        .await?;
    let (key, port) = transfer_slot(&records)?;
    client.file_transfer(port).upload(&key, data).await?;
    Ok(())
}

/// Requests a download slot and reads the announced number of bytes.
pub async fn download(
    client: &QueryClient,
    remote: &str,
    cid: u64,
    cpw: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let records = client
        .execute(
            Command::new("ftinitdownload")
                .arg("clientftfid", CLIENT_TRANSFER_ID)
                .arg("name", remote_path(remote))
                .arg("cid", cid)
                .arg("cpw", cpw)
                .arg("seekpos", 0),
        )
        .await?;
    let (key, port) = transfer_slot(&records)?;
    let size = records
        .first()
        .and_then(|r| r.get_int("size"))
        .and_then(|n| u64::try_from(n).ok())
        .ok_or("server did not announce a file size")?;
    let data = client.file_transfer(port).download(&key, size).await?;
    Ok(data.to_vec())
}

/// Extracts the transfer key and port from an `ftinit*` reply.
fn transfer_slot(records: &[Record]) -> Result<(String, u16), Box<dyn std::error::Error>> {
    let record = records.first().ok_or("empty file transfer reply")?;

    // Some servers report transfer failures inside the record
    if let Some(status) = record.get_int("status") {
        if status != 0 {
            let message = record.get_str("msg").unwrap_or("file transfer refused");
            return Err(format!("file transfer error {}: {}", status, message).into());
        }
    }

    let key = record
        .get_raw("ftkey")
        .map(|key| key.into_owned())
        .ok_or("reply is missing ftkey")?;
    let port = record
        .get_int("port")
        .and_then(|p| u16::try_from(p).ok())
        .ok_or("reply is missing a valid port")?;
    Ok((key, port))
}

fn remote_path(remote: &str) -> String {
    if remote.starts_with('/') {
        remote.to_string()
    } else {
        format!("/{}", remote)
    }
}

/// Parses a typed command line.
///
/// The first token is the command name, `-x` tokens are flags and `k=v`
/// tokens are options. Values are unescaped so `\s` and friends may be typed.
/// A key given more than once becomes a multi-option.
pub fn parse_command_line(line: &str) -> Result<Command, ClientError> {
    let mut tokens = line.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| invalid("empty command line".to_string()))?;

    let mut options: Vec<(String, Vec<String>)> = Vec::new();
    let mut flags = Vec::new();
    for token in tokens {
        if let Some(flag) = token.strip_prefix('-') {
            flags.push(flag.to_string());
        } else if let Some((key, value)) = token.split_once('=') {
            let value = unescape(value);
            match options.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => values.push(value),
                None => options.push((key.to_string(), vec![value])),
            }
        } else {
            return Err(invalid(format!(
                "unexpected token {:?} (expected key=value or -flag)",
                token
            )));
        }
    }

    let mut command = Command::new(name.to_lowercase());
    for (key, mut values) in options {
        let value = if values.len() == 1 {
            ArgValue::Single(values.remove(0))
        } else {
            ArgValue::List(values)
        };
        command = command.arg(key, value);
    }
    for flag in flags {
        command = command.flag(flag);
    }

    command.validate()?;
    Ok(command)
}

fn invalid(message: String) -> ClientError {
    ClientError::Protocol(tsquery_protocol::ProtocolError::InvalidCommand(message))
}

/// Formats response records for display.
pub fn format_records(records: &[Record], json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(records).unwrap_or_else(|e| e.to_string());
    }
    if records.is_empty() {
        return "(no records)".dimmed().to_string();
    }

    let mut output = String::new();
    for (i, record) in records.iter().enumerate() {
        if records.len() > 1 {
            output.push_str(&format!("{}\n", format!("[{}]", i).dimmed()));
        }
        for (key, value) in record.iter() {
            output.push_str(&format!("  {}: {}\n", key.cyan(), value));
        }
    }
    output.trim_end().to_string()
}

/// Formats one notification as a timestamped line.
pub fn format_notification(notification: &Notification, json: bool) -> String {
    let now = Local::now();
    if json {
        let value = serde_json::json!({
            "time": now.to_rfc3339(),
            "event": notification.name,
            "record": notification.record,
        });
        return value.to_string();
    }

    let fields = notification
        .record
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{} {} {}",
        now.format("%H:%M:%S").to_string().dimmed(),
        notification.name.yellow(),
        fields
    )
}

/// Formats bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
