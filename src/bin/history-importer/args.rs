use std::path::PathBuf;

use chrono_tz::Tz;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long)]
    pub device_id: String,

    #[arg(long)]
    pub file: PathBuf,

    /// Time zone of timestamps that carry no offset.
    #[arg(long, env = "PM_TIMEZONE", default_value = "UTC")]
    pub timezone: Tz,

    #[arg(long, default_value = "")]
    pub location: String,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}
