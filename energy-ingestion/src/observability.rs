use tracing_subscriber::{filter::Directive, EnvFilter};

pub fn init_tracing() -> anyhow::Result<()> {
    let default_directive: Directive = "energy_ingestion=info".parse()?;
    let filter = EnvFilter::from_default_env().add_directive(default_directive);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
