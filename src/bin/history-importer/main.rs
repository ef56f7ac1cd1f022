mod args;
mod csv;

use std::fs::File;

use anyhow::{Context as _, bail};
use args::Args;
use clap::Parser as _;
use pm_monitor::db::{bulk_insert_history, new_pool};

use crate::csv::CsvReadingIter;

const BULK_INSERT_SIZE: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let device_id = args.device_id.trim().to_string();
    if device_id.is_empty() {
        bail!("--device-id must not be empty");
    }

    let file =
        File::open(&args.file).with_context(|| format!("failed to open file: {:?}", args.file))?;
    let iter = CsvReadingIter::new(file, device_id, args.location.clone(), args.timezone)
        .context("failed to create CSV reading iterator")?;

    let pool = new_pool(&args.database_url).await?;

    let mut buffer = Vec::with_capacity(BULK_INSERT_SIZE);
    let mut total = 0;

    for (line, result) in iter.enumerate() {
        let record = result.with_context(|| format!("failed to parse CSV record {}", line + 1))?;
        buffer.push(record);

        if buffer.len() >= BULK_INSERT_SIZE {
            bulk_insert_history(&pool, &buffer)
                .await
                .context("failed to bulk insert readings")?;
            total += buffer.len();
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        bulk_insert_history(&pool, &buffer)
            .await
            .context("failed to bulk insert remaining readings")?;
        total += buffer.len();
    }

    println!("Inserted {} readings from {:?}", total, args.file);

    Ok(())
}
