use sluice_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    sluice_api::telemetry::init_tracing();
    tracing::info!(production = config.is_production(), "Configuration loaded and validated");

    let (_state, router) = sluice_api::setup::initialize_app(config.clone()).await?;
    sluice_api::setup::server::start_server(&config, router).await?;

    Ok(())
}
