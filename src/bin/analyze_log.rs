use std::path::PathBuf;

use ocpp_session_audit::adapters::log_file::load_log;
use ocpp_session_audit::app::init_logging;
use ocpp_session_audit::domain::analysis::{AnalysisOptions, DEFAULT_CONNECTORS, NoDirectory, analyze};
use ocpp_session_audit::domain::models::RowOrder;

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to analyze log: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut input: Option<PathBuf> = None;
    let mut row_order: Option<RowOrder> = None;
    let mut connectors = DEFAULT_CONNECTORS.to_vec();
    let mut compact = false;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--input" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--input requires a value".to_string());
                };
                input = Some(PathBuf::from(value));
                index += 2;
            }
            "--reversed" => {
                row_order = Some(RowOrder::Reversed);
                index += 1;
            }
            "--order" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--order requires a value".to_string());
                };
                row_order = Some(
                    RowOrder::parse(value).ok_or_else(|| format!("unknown row order: {value}"))?,
                );
                index += 2;
            }
            "--connectors" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--connectors requires a value".to_string());
                };
                connectors = parse_connectors(value)?;
                index += 2;
            }
            "--compact" => {
                compact = true;
                index += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let Some(input) = input else {
        return Err("--input is required".to_string());
    };

    init_logging().map_err(|error| error.to_string())?;

    let log = load_log(&input).map_err(|error| error.to_string())?;
    let row_order = row_order.or(log.row_order).unwrap_or_default();
    let options = AnalysisOptions {
        row_order,
        connectors,
    };

    let report = analyze(&log.rows, &options, &NoDirectory).map_err(|error| error.to_string())?;
    let rendered = if compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .map_err(|error| error.to_string())?;

    println!("{rendered}");
    Ok(())
}

fn parse_connectors(raw: &str) -> Result<Vec<u32>, String> {
    let connectors = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<u32>()
                .map_err(|_| format!("invalid connector id: {item}"))
        })
        .collect::<Result<Vec<u32>, String>>()?;

    if connectors.is_empty() {
        return Err("--connectors needs at least one connector id".to_string());
    }
    Ok(connectors)
}

fn print_help() {
    println!("analyze_log");
    println!("Reconstructs and classifies charging sessions from an exported message log.");
    println!();
    println!("Usage:");
    println!("  cargo run --bin analyze_log -- --input <rows.json> [--reversed | --order <order>] [--connectors 1,2] [--compact]");
    println!();
    println!("Options:");
    println!("  --input <path>       JSON array of rows, or {{\"rowOrder\": ..., \"rows\": [...]}}");
    println!("  --reversed           Rows are newest first (overrides a declared rowOrder)");
    println!("  --order <order>      chronological|reversed (also asc|desc, oldest-first|newest-first)");
    println!("  --connectors <list>  Comma separated connector ids (default: 1,2)");
    println!("  --compact            Print the report on a single line");
}
