use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use cvbridge_frame::{encode_telemetry, output_name, InputSnapshot, OutputTargets};
use serde::Serialize;

const TELEMETRY_SCHEMA: &str = "cvbridge/cli/v1/telemetry";
const COMMAND_SCHEMA: &str = "cvbridge/cli/v1/command-sent";

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
struct TelemetryOutput<'a> {
    schema_id: &'a str,
    seq: u64,
    cv: [i16; 2],
    audio: [i16; 2],
    knobs: Knobs,
    pulse: [bool; 2],
    switch: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct Knobs {
    main: i16,
    x: i16,
    y: i16,
}

#[derive(Serialize)]
struct CommandOutput<'a> {
    schema_id: &'a str,
    flags: u8,
    channels: [i16; 4],
    bytes: usize,
}

pub fn print_telemetry(snapshot: &InputSnapshot, seq: u64, format: OutputFormat) {
    let switch = switch_name(snapshot);
    match format {
        OutputFormat::Json => {
            let [main, x, y] = snapshot.controls;
            let out = TelemetryOutput {
                schema_id: TELEMETRY_SCHEMA,
                seq,
                cv: snapshot.cv,
                audio: snapshot.audio,
                knobs: Knobs { main, x, y },
                pulse: [snapshot.pulse(0), snapshot.pulse(1)],
                switch,
                timestamp: now_unix_millis(),
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
                .set_header(vec!["SEQ", "CV IN", "AUDIO IN", "KNOBS", "PULSE IN", "SWITCH"])
                .add_row(vec![
                    seq.to_string(),
                    pair(snapshot.cv),
                    pair(snapshot.audio),
                    format!(
                        "{} {} {}",
                        snapshot.controls[0], snapshot.controls[1], snapshot.controls[2]
                    ),
                    format!("{} {}", u8::from(snapshot.pulse(0)), u8::from(snapshot.pulse(1))),
                    switch.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{seq} cv={} audio={} knobs={}/{}/{} pulse={}{} switch={switch}",
                pair(snapshot.cv),
                pair(snapshot.audio),
                snapshot.controls[0],
                snapshot.controls[1],
                snapshot.controls[2],
                u8::from(snapshot.pulse(0)),
                u8::from(snapshot.pulse(1)),
            );
        }
        OutputFormat::Raw => {
            print_raw(&encode_telemetry(snapshot));
        }
    }
}

pub fn print_command(targets: &OutputTargets, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CommandOutput {
                schema_id: COMMAND_SCHEMA,
                flags: targets.flags,
                channels: targets.channels,
                bytes: targets.to_frame().len(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut header: Vec<String> = (0..targets.channels.len())
                .map(|index| output_name(index).to_string())
                .collect();
            header.push("pulse_out".to_string());
            let mut row: Vec<String> = targets.channels.iter().map(i16::to_string).collect();
            row.push(format!("{} {}", u8::from(targets.pulse(0)), u8::from(targets.pulse(1))));

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header)
                .add_row(row);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", command_line(targets)),
        OutputFormat::Raw => print_raw(&targets.to_frame()),
    }
}

/// One-line summary of a sent command, channels labelled by output.
fn command_line(targets: &OutputTargets) -> String {
    let channels: Vec<String> = targets
        .channels
        .iter()
        .enumerate()
        .map(|(index, value)| format!("{}={value}", output_name(index)))
        .collect();
    format!(
        "sent {} pulse={}{}",
        channels.join(" "),
        u8::from(targets.pulse(0)),
        u8::from(targets.pulse(1))
    )
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn switch_name(snapshot: &InputSnapshot) -> &'static str {
    snapshot
        .switch_position()
        .map(|position| position.name())
        .unwrap_or("invalid")
}

fn pair(values: [i16; 2]) -> String {
    format!("{} {}", values[0], values[1])
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_labels_each_output() {
        let targets = OutputTargets::new(0x02, [2047, -2048, 0, 5]);
        assert_eq!(
            command_line(&targets),
            "sent audio_out_1=2047 audio_out_2=-2048 cv_out_1=0 cv_out_2=5 pulse=01"
        );
    }

    #[test]
    fn invalid_switch_bits_are_named() {
        let snapshot = InputSnapshot {
            flags: 0b1100,
            ..InputSnapshot::default()
        };
        assert_eq!(switch_name(&snapshot), "invalid");
    }
}
