//! Battle Pilot CLI - script dry run
//!
//! Parses a battle script and prints what the executor would run, without
//! touching a device. Usage: `pilot <script> [settings.json]`

use std::process::ExitCode;

use battle_pilot::config::Settings;
use battle_pilot::script::{Command, Script};

fn main() -> ExitCode {
    battle_pilot::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(script_path) = args.first() else {
        eprintln!("usage: pilot <script> [settings.json]");
        return ExitCode::from(2);
    };

    let settings = match args.get(1) {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Failed to load settings from {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };

    let script = match Script::load(script_path) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Failed to read script {}: {}", script_path, e);
            return ExitCode::FAILURE;
        }
    };

    println!("Battle Pilot - dry run");
    println!("======================");
    println!();
    println!("Script: {}", script_path);
    println!("Instructions: {}", script.len());
    println!();

    for entry in script.entries() {
        let params = entry
            .raw
            .params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        let marker = match entry.command {
            Command::Unknown { .. } => " (skipped)",
            _ => "",
        };
        println!(
            "  {:>4}  {:<12} {}{}",
            entry.line(),
            entry.command.opcode(),
            params,
            marker
        );
    }

    if !script.malformed().is_empty() {
        println!();
        println!("Dropped {} malformed line(s):", script.malformed().len());
        for error in script.malformed() {
            println!("  - {}", error);
        }
    }

    println!();
    println!("Configuration:");
    println!("  - Assets: {}", settings.vision.asset_dir);
    println!("  - Template threshold: {}", settings.vision.template_threshold);
    println!("  - Poll interval: {}ms", settings.timings.poll_interval_ms);
    println!("  - Battle start timeout: {}ms", settings.timeouts.battle_start_ms);
    println!("  - Leave settlement: {}", settings.executor.leave_settlement);
    println!("  - Liveness monitor: {}", settings.monitor.enabled);

    ExitCode::SUCCESS
}
