use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunebridge::{bot, config::AppConfig, context::AppContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize logging before anything else can fail
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tunebridge=info".into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting TuneBridge v{}", env!("CARGO_PKG_VERSION"));

    let app = Arc::new(AppContext::build(config).await.map_err(|e| {
        error!("Startup failed: {}", e);
        anyhow::anyhow!(e)
    })?);

    let mut client = bot::create_client(app.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Discord client: {}", e))?;

    let transport = Arc::new(bot::SerenityTransport::new(client.http.clone()));
    let scheduler = app.scheduler(transport)?;
    let jobs = scheduler.spawn();
    info!("Started {} scheduled jobs", jobs.len());

    info!("Starting Discord bot...");
    let result = client.start().await;

    for job in jobs {
        job.abort();
    }

    match result {
        Ok(()) => info!("Discord bot shut down gracefully"),
        Err(e) => {
            error!("Discord bot error: {}", e);
            return Err(anyhow::anyhow!("{}", e));
        }
    }

    Ok(())
}
