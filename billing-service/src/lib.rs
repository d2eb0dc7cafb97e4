//! Billing service: patient invoicing and payment tracking for clinics.
//!
//! Exposes an HTTP API for creating invoices, listing and updating them,
//! deleting unpaid ones and recording payments. All routes are scoped to a
//! clinic via gateway-provided headers.

pub mod billing;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::http::Request;
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::services::{init_metrics, Database, InvoiceService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub invoices: InvoiceService,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration: connect to the
    /// database, run migrations, wire the service and the router.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        db.run_migrations().await?;

        init_metrics();

        let invoices = InvoiceService::new(Arc::new(db.clone()), Arc::new(db.clone()));

        let state = AppState {
            config: config.clone(),
            db,
            invoices,
        };

        let router = Router::new()
            .route(
                "/invoices",
                post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
            )
            .route(
                "/invoices/:invoice_id",
                get(handlers::invoices::get_invoice)
                    .patch(handlers::invoices::update_invoice)
                    .delete(handlers::invoices::delete_invoice),
            )
            .route(
                "/invoices/:invoice_id/payments",
                post(handlers::invoices::record_payment),
            )
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }),
            )
            .with_state(state);

        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// The bound port; useful when binding port 0 in tests.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the server until it is stopped.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        tracing::info!(port = self.port, "billing-service listening");
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
