use billing_service::{config::Config, Application};
use service_core::error::AppError;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing("info,billing_service=debug");

    let config = Config::from_env().map_err(AppError::ConfigError)?;
    tracing::info!(
        service = %config.service_name,
        host = %config.server.host,
        port = config.server.port,
        "Starting billing-service"
    );

    let app = Application::build(config).await?;
    app.run_until_stopped().await
}
