//! Application startup and lifecycle management.

use crate::config::{InvoicingConfig, StorageBackend};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::middleware::tenant::{USER_HEADER, WORKSPACE_HEADER};
use crate::services::{
    init_metrics, HtmlInvoiceRenderer, InvoiceLifecycle, InvoiceMailer, InvoiceRenderer,
    InvoiceStore, LogMailer, MembershipPermissions, MemoryStore, PaymentRecorder, PgStore,
    SmtpMailer, StoreActivitySink,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InvoiceStore>,
    pub invoices: Arc<InvoiceLifecycle>,
    pub payments: Arc<PaymentRecorder>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        mailer: Arc<dyn InvoiceMailer>,
        renderer: Arc<dyn InvoiceRenderer>,
    ) -> Self {
        let permissions = Arc::new(MembershipPermissions::new(store.clone()));
        let activity = Arc::new(StoreActivitySink::new(store.clone()));

        let invoices = InvoiceLifecycle::new(
            store.clone(),
            permissions.clone(),
            activity.clone(),
            mailer,
            renderer,
        );
        let payments = PaymentRecorder::new(store.clone(), permissions, activity);

        Self {
            store,
            invoices: Arc::new(invoices),
            payments: Arc::new(payments),
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn InvoiceStore> = match config.database.backend {
            StorageBackend::Postgres => {
                let db = PgStore::new(
                    config.database.url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to PostgreSQL: {}", e);
                    e
                })?;
                db.run_migrations().await?;
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let mailer: Arc<dyn InvoiceMailer> = if config.smtp.enabled {
            match SmtpMailer::new(config.smtp.clone()) {
                Ok(mailer) => {
                    tracing::info!("SMTP mailer initialized");
                    Arc::new(mailer)
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP mailer: {}. Logging instead.", e);
                    Arc::new(LogMailer)
                }
            }
        } else {
            tracing::info!("SMTP disabled, invoice emails are logged only");
            Arc::new(LogMailer)
        };

        let state = AppState::new(store, mailer, Arc::new(HtmlInvoiceRenderer));
        Self::with_state(config.common.socket_addr(), state).await
    }

    /// Bind a listener for prepared state. Port 0 picks a random port.
    pub async fn with_state(addr: SocketAddr, state: AppState) -> Result<Self, AppError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router: router(state),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        tracing::info!("invoicing-service listening on port {}", self.port);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/:id",
            get(handlers::invoices::get_invoice)
                .put(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route(
            "/invoices/:id/status",
            patch(handlers::invoices::update_status),
        )
        .route("/invoices/:id/send", post(handlers::invoices::send_invoice))
        .route(
            "/invoices/:id/document",
            get(handlers::invoices::download_invoice),
        )
        .route(
            "/invoices/:id/payments",
            post(handlers::payments::record_payment).get(handlers::payments::list_payments),
        )
        .route("/activity", get(handlers::activity::list_activity))
        .route("/notifications", get(handlers::activity::list_notifications))
        // MatchedPath is only known after routing.
        .route_layer(from_fn(http_metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let header = |name: &str| {
                    request
                        .headers()
                        .get(name)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-")
                        .to_string()
                };

                tracing::info_span!(
                    "http_request",
                    request_id = %header(REQUEST_ID_HEADER),
                    workspace_id = %header(WORKSPACE_HEADER),
                    user_id = %header(USER_HEADER),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
