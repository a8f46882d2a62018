use std::collections::BTreeMap;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muxprims_proxy::FileInfo;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What `info` reports about a server.
#[derive(Serialize)]
pub struct ServerInfo {
    pub cwd: String,
    pub properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
}

pub fn print_server_info(info: &ServerInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PROPERTY", "VALUE"])
                .add_row(vec!["cwd".to_string(), info.cwd.clone()]);
            for (key, value) in &info.properties {
                table.add_row(vec![key.clone(), printable(value)]);
            }
            println!("{table}");
            if let Some(env) = &info.environment {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["VARIABLE", "VALUE"]);
                for (key, value) in env {
                    table.add_row(vec![key.clone(), value.clone()]);
                }
                println!("{table}");
            }
        }
        OutputFormat::Pretty => {
            println!("Server Info:");
            println!("  Working directory: {}", info.cwd);
            for (key, value) in &info.properties {
                println!("  {key:<17}  {}", printable(value));
            }
            if let Some(env) = &info.environment {
                println!("Environment:");
                for (key, value) in env {
                    println!("  {key}={value}");
                }
            }
        }
        OutputFormat::Raw => println!("{}", info.cwd),
    }
}

pub fn print_listing(entries: &[FileInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(entries),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "TYPE", "SIZE", "MODE", "MODIFIED"]);
            for entry in entries {
                table.add_row(vec![
                    display_name(entry),
                    kind(entry).to_string(),
                    entry.length.to_string(),
                    format!("{:04o}", entry.permissions),
                    entry.last_modified.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for entry in entries {
                println!(
                    "{:<4} {:04o} {:>12} {}",
                    kind(entry),
                    entry.permissions,
                    entry.length,
                    display_name(entry)
                );
            }
        }
        OutputFormat::Raw => {
            for entry in entries {
                println!("{}", entry.name);
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn kind(entry: &FileInfo) -> &'static str {
    match (entry.symlink, entry.directory) {
        (true, _) => "link",
        (false, true) => "dir",
        (false, false) => "file",
    }
}

fn display_name(entry: &FileInfo) -> String {
    if entry.symlink {
        format!("{} -> {}", entry.name, entry.link_target)
    } else {
        entry.name.clone()
    }
}

/// Line separators and similar control characters, made visible.
fn printable(value: &str) -> String {
    value.escape_debug().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kinds() {
        let mut entry = FileInfo {
            name: "x".into(),
            exists: true,
            ..FileInfo::default()
        };
        assert_eq!(kind(&entry), "file");
        entry.directory = true;
        assert_eq!(kind(&entry), "dir");
        entry.symlink = true;
        entry.link_target = "target".into();
        assert_eq!(kind(&entry), "link");
        assert_eq!(display_name(&entry), "x -> target");
    }

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(printable("\n"), "\\n");
        assert_eq!(printable("/"), "/");
    }
}
