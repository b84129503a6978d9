#![cfg(not(tarpaulin_include))]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tracker::backup::{self, Workbook};
use tracker::client::{ApiClient, RemoteTier};
use tracker::config::StoreArgs;
use tracker::export::{to_csv, to_xlsx};
use tracker::import::load_table;
use tracker::insights::AnalyticsReport;
use tracker::logging;
use tracker::metrics::format_inr;
use tracker::renewal::{RENEWAL_WINDOW_DAYS, expiring_contracts};
use tracker::schema::RowVariant;
use tracker::storage::LocalTiers;
use tracker::sync::{PersistenceSynchronizer, SyncConfig};

#[derive(Parser, Debug)]
#[command(name = "tracker-cli", version, about = "Work with tracker tables from the command line")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// API username, used with --api-url
    #[arg(long, env = "TRACKER_API_USER", global = true)]
    username: Option<String>,

    #[arg(long, env = "TRACKER_API_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List contracts and bills expiring soon
    Expiring {
        #[arg(long, default_value_t = RENEWAL_WINDOW_DAYS)]
        window: i64,
    },
    /// Print the analytics report as JSON
    Report {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a table to a .csv or .xlsx file
    Export { table: String, file: PathBuf },
    /// Append rows from a .csv or .xlsx file to a table
    Import {
        table: String,
        file: PathBuf,
        /// Replace the table instead of appending
        #[arg(long)]
        replace: bool,
    },
    /// Save all tables to a compressed backup file
    Backup { file: PathBuf },
    /// Load all tables from a backup file
    Restore { file: PathBuf },
}

struct Tables {
    local: LocalTiers,
    remote: Option<Arc<dyn RemoteTier>>,
}

impl Tables {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let local = LocalTiers::on_disk(cli.store.tables_dir())
            .with_context(|| format!("cannot open {}", cli.store.tables_dir().display()))?;

        let remote = match &cli.store.api_url {
            Some(url) => {
                let client = ApiClient::new(url.clone());
                if let (Some(user), Some(password)) = (&cli.username, &cli.password) {
                    client.login(user, password).context("API login failed")?;
                }
                Some(Arc::new(client) as Arc<dyn RemoteTier>)
            }
            None => None,
        };

        Ok(Tables { local, remote })
    }

    fn synchronizer(&self, variant: RowVariant) -> PersistenceSynchronizer {
        PersistenceSynchronizer::new(variant, self.remote.clone(), self.local.clone(), SyncConfig::default())
    }

    async fn load(&self, variant: RowVariant) -> anyhow::Result<Vec<tracker::RowRecord>> {
        let outcome = self.synchronizer(variant).load(Vec::new()).await?;
        tracing::debug!(table = %variant, source = ?outcome.source, rows = outcome.rows.len(), "table loaded");
        Ok(tracker::GridStore::from_rows(variant, outcome.rows).into_rows())
    }

    async fn workbook(&self) -> anyhow::Result<Workbook> {
        Ok(Workbook {
            saved_at: Some(chrono::Local::now().naive_local()),
            contractors: self.load(RowVariant::ContractorList).await?,
            bills: self.load(RowVariant::BillTracker).await?,
            epbg: self.load(RowVariant::Epbg).await?,
        })
    }

    async fn save(&self, variant: RowVariant, rows: Vec<tracker::RowRecord>) -> anyhow::Result<()> {
        let rows = tracker::GridStore::from_rows(variant, rows).into_rows();
        let outcome = self.synchronizer(variant).flush(rows).await?;
        if let Some(reason) = &outcome.fallback_reason {
            eprintln!("warning: {} saved locally only ({})", variant, reason);
        }
        println!("✓ {} rows saved to {}", outcome.rows, variant);
        Ok(())
    }
}

fn parse_table(table: &str) -> anyhow::Result<RowVariant> {
    match RowVariant::from_slug(table) {
        Some(variant) => Ok(variant),
        None => bail!("unknown table '{}' (expected contractor-list, bill-tracker or epbg)", table),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let tables = Tables::open(&cli)?;

    match &cli.command {
        Command::Expiring { window } => {
            let workbook = tables.workbook().await?;
            let today = chrono::Local::now().date_naive();
            let expiring = expiring_contracts(&workbook.contractors, &workbook.bills, today, *window);
            if expiring.is_empty() {
                println!("No contracts expiring within {} days", window);
            }
            for item in expiring {
                println!(
                    "{:<9} {:>4}d  {:<30} {:<14} ₹{}",
                    format!("{:?}", item.urgency).to_uppercase(),
                    item.days_until_expiry,
                    item.contract.contractor_name,
                    item.contract.source.slug(),
                    format_inr(item.contract.value)
                );
            }
        }
        Command::Report { output } => {
            let workbook = tables.workbook().await?;
            let report = AnalyticsReport::build(&workbook, chrono::Local::now().naive_local());
            let json = report.to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(path, json)?;
                    println!("✓ report written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::Export { table, file } => {
            let variant = parse_table(table)?;
            let rows = tables.load(variant).await?;
            let extension = file
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());
            let bytes = match extension.as_deref() {
                Some("csv") => to_csv(variant, &rows).into_bytes(),
                Some("xlsx") => to_xlsx(variant, &rows)?,
                _ => bail!("export file must end in .csv or .xlsx"),
            };
            std::fs::write(file, bytes)?;
            println!("✓ {} rows exported to {}", rows.len(), file.display());
        }
        Command::Import { table, file, replace } => {
            let variant = parse_table(table)?;
            let report = load_table(variant, file)?;
            if report.skipped > 0 {
                eprintln!("warning: skipped {} malformed rows", report.skipped);
            }
            if !report.unmapped_columns.is_empty() {
                eprintln!("warning: ignored columns: {}", report.unmapped_columns.join(", "));
            }
            let mut rows = if *replace { Vec::new() } else { tables.load(variant).await? };
            rows.extend(report.rows);
            tables.save(variant, rows).await?;
        }
        Command::Backup { file } => {
            let workbook = tables.workbook().await?;
            backup::save_workbook(&workbook, file)?;
            println!("✓ {} rows backed up to {}", workbook.row_count(), file.display());
        }
        Command::Restore { file } => {
            let workbook = backup::load_workbook(file)?;
            for variant in RowVariant::ALL {
                tables.save(variant, workbook.table(variant).to_vec()).await?;
            }
        }
    }

    Ok(())
}
