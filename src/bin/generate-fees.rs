/// Generate monthly fees from cron, e.g. on the 1st of each month:
///   0 3 1 * * /app/generate-fees --from 2026-11 --to 2026-11
///
/// Usage: generate-fees --from YYYY-MM [--to YYYY-MM] [--tenant SLUG]
use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;

use tutorcenter_api::{
    db,
    middleware::tenant::is_valid_slug,
    services::fees::FeeService,
};

#[derive(Parser)]
#[command(name = "generate-fees", about = "Generate monthly fees for tutoring centers")]
struct Args {
    /// Center slug (all active centers if omitted)
    #[arg(long)]
    tenant: Option<String>,

    /// First month to bill, YYYY-MM
    #[arg(long, value_parser = parse_month)]
    from: NaiveDate,

    /// Last month to bill, YYYY-MM (defaults to --from)
    #[arg(long, value_parser = parse_month)]
    to: Option<NaiveDate>,
}

fn parse_month(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .map_err(|_| format!("'{s}' is not a YYYY-MM month"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let to = args.to.unwrap_or(args.from);

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = db::create_pool(&database_url).await?;

    let slugs = match args.tenant {
        Some(slug) => {
            anyhow::ensure!(is_valid_slug(&slug), "invalid tenant slug '{slug}'");
            vec![slug]
        }
        None => db::active_center_slugs(&pool).await?,
    };

    tracing::info!("Generating fees {} to {} for {} center(s)", args.from, to, slugs.len());

    let mut failures = 0;
    for slug in &slugs {
        match FeeService::generate(&pool, slug, args.from, to, None).await {
            Ok(r) => tracing::info!("{slug}: {} created, {} skipped", r.created, r.skipped),
            Err(e) => {
                failures += 1;
                tracing::error!("{slug}: fee generation failed: {e}");
            }
        }
    }

    anyhow::ensure!(failures == 0, "{failures} center(s) failed");
    Ok(())
}
