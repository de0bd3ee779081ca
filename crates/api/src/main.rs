use anyhow::Context;

use medrelay_api::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medrelay_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr;

    let app = medrelay_api::app::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
