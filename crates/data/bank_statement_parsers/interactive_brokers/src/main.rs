use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fs, path::PathBuf};

use ibkr_parser::{ParseOptions, StatementParser};

/// Parse an IBKR activity statement export into JSON.
#[derive(Debug, Parser)]
#[command(name = "ibkr_parser", author, version, about = "Parse an IBKR activity statement", long_about = None)]
struct Args {
    /// Statement file. Defaults to the first .csv file in the current directory
    input: Option<PathBuf>,

    /// Field delimiter, e.g. "," or "\t" (overrides the settings file)
    #[arg(short = 'd', long = "delimiter")]
    delimiter: Option<String>,

    /// Path to a settings JSON file. Falls back to ./ibkr_settings.json when present
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Write the JSON result here instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Pretty-print the JSON result
    #[arg(long)]
    pretty: bool,

    /// Print every diagnostic after the summary
    #[arg(long)]
    diagnostics: bool,
}

fn find_csv_file() -> Option<PathBuf> {
    let current_dir = env::current_dir().ok()?;
    let mut entries: Vec<PathBuf> = fs::read_dir(&current_dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("csv"))
        .collect();
    entries.sort();
    entries.into_iter().next()
}

fn main() -> Result<()> {
    logger::init();
    let args = Args::parse();

    let csv_path = match args.input.clone().or_else(find_csv_file) {
        Some(path) => path,
        None => anyhow::bail!(
            "No CSV file found in current directory. Please provide a statement file as the first argument."
        ),
    };

    let settings = settings_loader::load_settings_with_fallback(args.settings.as_ref())?
        .unwrap_or_default();
    let mut options = ParseOptions::from_settings(&settings).context("Invalid parser settings")?;
    if let Some(delimiter) = args.delimiter.as_deref() {
        options = options
            .with_delimiter(delimiter)
            .context("Invalid --delimiter")?;
    }

    eprintln!("📖 Parsing IBKR statement: {}", csv_path.display());
    let text = fs::read_to_string(&csv_path)
        .with_context(|| format!("Cannot open {}", csv_path.display()))?;

    let parsed = StatementParser::new(options).parse(&text);

    if parsed.is_empty() {
        eprintln!("❌ Nothing parsed.");
    } else {
        let account = parsed.account();
        eprintln!(
            "✓ Parsed: {} positions, {} trades, {} option trades (account={}, period_end={})",
            parsed.positions().len(),
            parsed.trades().len(),
            parsed.option_trades().len(),
            if account.is_placeholder() { "unknown" } else { account.account_id.as_str() },
            parsed
                .statement_info()
                .period_end
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }
    eprintln!("⚠️  {} diagnostic(s)", parsed.diagnostics().len());

    if args.diagnostics {
        for d in parsed.diagnostics() {
            let line = d.line.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
            eprintln!("  line {:>5} [{}] {}", line, d.section, d.reason());
        }
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&parsed)?
    } else {
        serde_json::to_string(&parsed)?
    };

    // stdout carries only the JSON; status lines above go to stderr
    match args.output {
        Some(path) => {
            fs::write(&path, json)
                .with_context(|| format!("Cannot write {}", path.display()))?;
            eprintln!("✅ Written to: {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
