use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::error::ErrorKind;
use clap::Parser;
use regscrape::config::Settings;
use regscrape::process::{process_site, write_records};
use regscrape::site::{load_sites, DriverKind, SiteConfig};
use regscrape::{info_time, sites, telemetry, Error, Result};

/// Scrape a publication register and print its records as a JSON array.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Register to scrape (see --list)
    site: Option<String>,
    /// Sub-register, for registers that have several (e.g. a bulletin series)
    variant: Option<String>,
    /// JSON file with extra site descriptors
    #[arg(long, env = "REGSCRAPE_SITES")]
    sites: Option<PathBuf>,
    /// Browser driver, overriding the site default (http or chrome)
    #[arg(long)]
    driver: Option<DriverKind>,
    /// List the known registers and exit
    #[arg(long)]
    list: bool,
    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };
    telemetry::init_telemetry();

    let start_time = Local::now();
    match run(cli).await {
        Ok(()) => {
            info_time!(start_time, "Full program time:");
            ExitCode::SUCCESS
        }
        Err(err) if err.is_usage() => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let extra = match &cli.sites {
        Some(path) => load_sites(path)?,
        None => Vec::new(),
    };
    let known = sites::registry(extra);

    if cli.list {
        for site in &known {
            println!("{:<16} {}", site.key, site.source);
        }
        return Ok(());
    }

    let Some(key) = cli.site.as_deref() else {
        print_usage(&known);
        return Err(Error::MissingSite);
    };
    let Some(site) = sites::find(&known, key) else {
        print_usage(&known);
        return Err(Error::UnknownSite(key.to_string()));
    };
    if let Err(err) = site.resolve_variant(cli.variant.as_deref()) {
        eprintln!("Usage: {}", site.usage());
        return Err(err);
    }

    let mut settings = Settings::new()?;
    if cli.driver.is_some() {
        settings.driver = cli.driver;
    }

    let records = process_site(Arc::new(site.clone()), cli.variant.as_deref(), &settings).await?;
    write_records(std::io::stdout().lock(), &records, cli.pretty)
}

fn print_usage(known: &[SiteConfig]) {
    eprintln!("Usage: regscrape [OPTIONS] <SITE> [VARIANT]");
    eprintln!("Known sites:");
    for site in known {
        eprintln!("  {}", site.usage());
    }
}
