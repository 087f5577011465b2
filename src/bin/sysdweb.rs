use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = sysdweb::sd::cli::Args::parse();
    let mut cfg = sysdweb::sd::config::load_config(&args.config)?;
    args.apply(&mut cfg);

    // RUST_LOG wins over global.log_level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(
        component = "config",
        path = %args.config.display(),
        services = cfg.services.len(),
        "config loaded"
    );

    sysdweb::sd::web::run(cfg).await
}
