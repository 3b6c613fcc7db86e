use anyhow::{Context, Result, ensure};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub retention_minutes: u32,
    pub rate_limit_max_uploads: u32,
    pub rate_limit_window_secs: u32,
    pub max_upload_bytes: usize,
    /// Seconds between background sweeps; 0 leaves sweeping to cron.
    pub sweep_interval_secs: u64,
    /// Shared secret for `/cron`. Unset disables the endpoint.
    pub cron_key: Option<String>,
}

/// What the process should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Sweep,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Temporary file sharing with automatic expiry")]
pub struct Args {
    /// Host to bind to (overrides TMPSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TMPSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding one namespace per upload (overrides TMPSHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Rate-limit ledger database URL (overrides TMPSHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Minutes an upload stays available (overrides TMPSHARE_RETENTION_MINUTES)
    #[arg(long)]
    pub retention_minutes: Option<u32>,

    /// Uploads allowed per client per window (overrides TMPSHARE_RATE_LIMIT_MAX)
    #[arg(long)]
    pub rate_limit_max: Option<u32>,

    /// Rate-limit window in seconds (overrides TMPSHARE_RATE_LIMIT_WINDOW)
    #[arg(long)]
    pub rate_limit_window: Option<u32>,

    /// Largest accepted request body in bytes (overrides TMPSHARE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Seconds between in-process sweeps, 0 to disable (overrides TMPSHARE_SWEEP_INTERVAL)
    #[arg(long)]
    pub sweep_interval: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run one maintenance sweep, print the report and exit
    #[arg(long, conflicts_with = "migrate")]
    pub sweep: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();
        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.sweep {
            RunMode::Sweep
        } else {
            RunMode::Serve
        };
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, mode))
    }

    /// Merge CLI args over an environment lookup over defaults.
    fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_str = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_str("TMPSHARE_HOST", "0.0.0.0")),
            port: pick(args.port, &lookup, "TMPSHARE_PORT", 3000)?,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_str("TMPSHARE_STORAGE_DIR", "./data/uploads")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_str(
                    "TMPSHARE_DATABASE_URL",
                    "sqlite://./data/meta/rate_limits.db",
                )
            }),
            retention_minutes: pick(
                args.retention_minutes,
                &lookup,
                "TMPSHARE_RETENTION_MINUTES",
                60,
            )?,
            rate_limit_max_uploads: pick(
                args.rate_limit_max,
                &lookup,
                "TMPSHARE_RATE_LIMIT_MAX",
                2,
            )?,
            rate_limit_window_secs: pick(
                args.rate_limit_window,
                &lookup,
                "TMPSHARE_RATE_LIMIT_WINDOW",
                60,
            )?,
            max_upload_bytes: pick(
                args.max_upload_bytes,
                &lookup,
                "TMPSHARE_MAX_UPLOAD_BYTES",
                100 * 1024 * 1024,
            )?,
            sweep_interval_secs: pick(
                args.sweep_interval,
                &lookup,
                "TMPSHARE_SWEEP_INTERVAL",
                300,
            )?,
            cron_key: lookup("CRON_KEY").filter(|key| !key.is_empty()),
        };

        ensure!(cfg.retention_minutes > 0, "retention must be at least one minute");
        ensure!(cfg.rate_limit_max_uploads > 0, "rate limit must allow at least one upload");
        ensure!(cfg.rate_limit_window_secs > 0, "rate-limit window must be positive");
        ensure!(cfg.max_upload_bytes > 0, "max upload size must be positive");

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.retention_minutes))
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.rate_limit_window_secs))
    }
}

/// CLI value, else parsed environment value, else the default.
fn pick<T>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, raw)),
        None => Ok(default),
    }
}
