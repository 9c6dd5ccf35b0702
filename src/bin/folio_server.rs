//!
//! folio server binary
//! --------------------
//! Command-line entry point for the folio media admin server. Configuration is
//! layered: built-in defaults, then an optional JSON config file, then `FOLIO_*`
//! environment variables, then CLI flags.

use anyhow::Result;
use std::env;
use std::path::PathBuf;

use folio::config::ServerConfig;

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    arg_value(args, flag).and_then(|v| v.parse::<u16>().ok())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn apply_args(cfg: &mut ServerConfig, args: &[String]) {
    if let Some(p) = parse_port_arg(args, "--http-port") { cfg.http_port = p; }
    if let Some(v) = arg_value(args, "--bind") { cfg.bind = v; }
    if let Some(v) = arg_value(args, "--storage-root") { cfg.store.storage_root = PathBuf::from(v); }
    if let Some(v) = arg_value(args, "--trash-root") { cfg.store.trash_root = PathBuf::from(v); }
    if let Some(v) = arg_value(args, "--snapshot") { cfg.store.snapshot_path = PathBuf::from(v); }
    if has_flag(args, "--no-watch") { cfg.store.watcher.enabled = false; }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("folio Server\n\nUSAGE:\n  folio_server [--config FILE] [--http-port N] [--bind ADDR] [--storage-root PATH] [--trash-root PATH] [--snapshot FILE] [--no-watch]\n\nOPTIONS:\n  --config FILE         JSON config file (env: FOLIO_CONFIG)\n  --http-port N         HTTP port (env: FOLIO_HTTP_PORT, default 4000)\n  --bind ADDR           Bind address (env: FOLIO_BIND, default 0.0.0.0)\n  --storage-root PATH   Live media folder (env: FOLIO_STORAGE_ROOT, default uploads)\n  --trash-root PATH     Recycle bin folder (env: FOLIO_TRASH_ROOT, default trash)\n  --snapshot FILE       Snapshot document (env: FOLIO_SNAPSHOT_PATH, default data/portfolio.json)\n  --no-watch            Disable the storage watcher (env: FOLIO_WATCH=false)\n");
        return Ok(());
    }

    let config_file = arg_value(&args, "--config").or_else(|| env::var("FOLIO_CONFIG").ok());
    let mut cfg = match &config_file {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };
    cfg.apply_env();
    apply_args(&mut cfg, &args);

    tracing::info!(
        "Using port: http={}, storage_root={}, config={:?}",
        cfg.http_port,
        cfg.store.storage_root.display(),
        config_file
    );
    folio::server::run_with_config(cfg).await
}
