use std::sync::Arc;

use tokio::net::TcpListener;

pub async fn serve(bind: Option<String>) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::build_service(&config).await?;

    let bind = bind.unwrap_or(config.server.bind);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind}: {e}"))?;

    println!("Serving kiln API on http://{bind}");
    kiln::api::serve(listener, Arc::new(service)).await?;
    Ok(())
}
