use std::net::SocketAddr;

use chrono_tz::Tz;
use clap::Parser;
use pm_monitor::waqi::DEFAULT_WAQI_URL;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3005")]
    pub listen: SocketAddr,

    /// Falls back to an in-memory store when unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Time zone for hour and day buckets and for naive timestamps.
    #[arg(long, env = "PM_TIMEZONE", default_value = "UTC")]
    pub timezone: Tz,

    #[arg(long, env = "WAQI_URL", default_value = DEFAULT_WAQI_URL)]
    pub waqi_url: String,

    #[arg(long, env = "WAQI_TOKEN")]
    pub waqi_token: Option<String>,

    #[arg(long, env = "WAQI_TIMEOUT_SECS", default_value_t = 5)]
    pub waqi_timeout_secs: u64,
}
