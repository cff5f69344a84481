use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use cubelink_sim::CubeProcess;
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

#[derive(Serialize)]
struct MessageOutput<'a> {
    cube: &'a str,
    payload_size: usize,
    payload: serde_json::Value,
    timestamp: String,
}

/// Print one message received from `cube`.
pub fn print_message(cube: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                cube,
                payload_size: payload.len(),
                payload: payload_json(payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CUBE", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    cube.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "cube={cube} size={} payload={}",
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(payload);
        }
    }
}

#[derive(Serialize)]
struct CubeRow {
    cube: String,
    state: String,
    pid: Option<u32>,
    channel: String,
}

/// Print a summary of running cubes.
pub fn print_cubes(cubes: &[CubeProcess], format: OutputFormat) {
    let rows: Vec<CubeRow> = cubes
        .iter()
        .map(|cube| CubeRow {
            cube: cube.label(),
            state: cube.state().to_string(),
            pid: cube.pid(),
            channel: cube.channel_path().display().to_string(),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CUBE", "STATE", "PID", "CHANNEL"]);
            for row in &rows {
                table.add_row(vec![
                    row.cube.clone(),
                    row.state.clone(),
                    row.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string()),
                    row.channel.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in &rows {
                println!("{} {} {}", row.cube, row.state, row.channel);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Embed JSON payloads as JSON, everything else as a preview string.
fn payload_json(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| serde_json::Value::String(payload_preview(payload)))
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
