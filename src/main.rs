use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use menu_harvester::config::{self, Settings, SinkKind};
use menu_harvester::fetcher;
use menu_harvester::parser::Extractor;
use menu_harvester::pipeline::{Harvester, RunStats};
use menu_harvester::seeds;
use menu_harvester::sink::memory::MemorySink;
use menu_harvester::sink::sqlite::SqliteSink;
use menu_harvester::sink::Sink;

#[derive(Parser)]
#[command(name = "menu_harvester", about = "Restaurant menu harvester")]
struct Cli {
    /// Config file (default: ./harvester.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every seed once, wait for the run to drain, then exit
    Run {
        /// Export into memory and print the result instead of writing the sink
        #[arg(long)]
        dry_run: bool,
    },
    /// Harvest on a fixed interval until Ctrl-C
    Serve,
    /// List restaurants stored in the SQLite sink
    Partitions,
    /// Print the stored rows of one restaurant
    Show {
        /// Restaurant name (partition)
        restaurant: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run { dry_run } => {
            let memory = dry_run.then(|| Arc::new(MemorySink::new()));
            let sink: Arc<dyn Sink> = match &memory {
                Some(m) => m.clone(),
                None => open_sink(&settings)?,
            };

            let harvester = start_harvester(&settings, sink)?;
            if harvester.run_once().is_none() {
                anyhow::bail!("Harvester refused to start a run");
            }
            harvester.wait_idle().await;
            let stats = harvester.last_stats().unwrap_or_default();
            harvester.shutdown().await;
            print_stats(&stats);

            if let Some(m) = memory {
                for (name, rows) in m.snapshot() {
                    println!("\n== {} ({} rows) ==", name, rows.len().saturating_sub(1));
                    for row in rows.iter().skip(1) {
                        println!("  {}", row.join(" | "));
                    }
                }
            }
            Ok(())
        }
        Commands::Serve => {
            let sink = open_sink(&settings)?;
            let harvester = start_harvester(&settings, sink)?;
            let mut ticker = tokio::time::interval(settings.schedule.interval());
            println!(
                "Harvesting {} every {}s. Ctrl-C to stop.",
                settings.seed_summary(),
                settings.schedule.interval().as_secs()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        harvester.run_once();
                    }
                    res = tokio::signal::ctrl_c() => {
                        res.context("Failed to listen for Ctrl-C")?;
                        println!("Stopping...");
                        break;
                    }
                }
            }
            harvester.shutdown().await;
            if let Some(stats) = harvester.last_stats() {
                print_stats(&stats);
            }
            Ok(())
        }
        Commands::Partitions => {
            let sink = SqliteSink::open(&settings.sink.path)?;
            let parts = sink.list_partitions()?;
            if parts.is_empty() {
                println!("No restaurants stored yet. Run 'run' first.");
                return Ok(());
            }
            println!("{:<40} | {:>6} | {:<20}", "Restaurant", "Dishes", "Created");
            println!("{}", "-".repeat(72));
            for p in &parts {
                println!(
                    "{:<40} | {:>6} | {:<20}",
                    truncate(&p.name, 40),
                    p.rows.saturating_sub(1),
                    p.created_at
                );
            }
            println!("\n{} restaurants", parts.len());
            Ok(())
        }
        Commands::Show { restaurant, json } => {
            let sink = SqliteSink::open(&settings.sink.path)?;
            let rows = sink.read_rows(&restaurant)?;
            if json {
                let dishes: Vec<_> = rows
                    .iter()
                    .skip(1)
                    .map(|(row, [category, sub_category, name, description, price])| {
                        serde_json::json!({
                            "row": row,
                            "category": category,
                            "sub_category": sub_category,
                            "name": name,
                            "description": description,
                            "price": price,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&dishes)?);
            } else {
                println!(
                    "{:>4} | {:<16} | {:<16} | {:<32} | {:>8}",
                    "Row", "Category", "SubCategory", "Name", "Price"
                );
                println!("{}", "-".repeat(88));
                for (row, values) in rows.iter().skip(1) {
                    println!(
                        "{:>4} | {:<16} | {:<16} | {:<32} | {:>8}",
                        row,
                        truncate(&values[0], 16),
                        truncate(&values[1], 16),
                        truncate(&values[2], 32),
                        values[4]
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_sink(settings: &Settings) -> anyhow::Result<Arc<dyn Sink>> {
    Ok(match settings.sink.kind {
        SinkKind::Sqlite => Arc::new(SqliteSink::open(&settings.sink.path)?),
        SinkKind::Memory => Arc::new(MemorySink::new()),
    })
}

fn start_harvester(settings: &Settings, sink: Arc<dyn Sink>) -> anyhow::Result<Harvester> {
    let extractor = Extractor::new(&settings.page).context("Invalid page selectors")?;
    Ok(Harvester::start(
        &settings.pipeline,
        Arc::from(seeds::from_settings(settings)),
        fetcher::factory_from_settings(&settings.fetcher),
        Arc::new(extractor),
        sink,
    ))
}

fn print_stats(s: &RunStats) {
    println!(
        "Seeded {} | parsed {} ({} failed) | exported {} ({} failed)",
        s.seeded, s.parsed, s.parse_failures, s.exported, s.export_failures
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
