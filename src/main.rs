use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lead_reactivator::api::workflow_routes;
use lead_reactivator::config::{GatewayConfig, ServerConfig, SmtpConfig, WorkflowConfig};
use lead_reactivator::gateway::{MessageGateway, WebhookGateway};
use lead_reactivator::sink::{LogSink, SendSink, SmtpSink};
use lead_reactivator::workflow::BatchController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let server_config = ServerConfig::from_env()?;
    let _log_guard = init_tracing(server_config.log_dir.as_deref());

    let gateway_config = GatewayConfig::from_env()?;
    let workflow_config = WorkflowConfig::from_env()?;

    eprintln!("📨 Lead Reactivator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Generate: {}", gateway_config.generate_url);
    eprintln!("   Revise: {}", gateway_config.revise_url);
    eprintln!("   Failure policy: {:?}", workflow_config.failure_policy);

    let (gateway, sink) = build_backends(gateway_config).context("Failed to create backends")?;

    let controller = BatchController::new(gateway, sink, workflow_config);
    let app = workflow_routes(Arc::clone(&controller));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server_config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", server_config.port))?;
    eprintln!("   API: http://0.0.0.0:{}/api/workflow", server_config.port);
    eprintln!("   Events: ws://0.0.0.0:{}/ws\n", server_config.port);
    tracing::info!(port = server_config.port, "Control API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await
        .context("Server error")?;

    Ok(())
}

/// Webhook gateway, plus SMTP delivery when configured or a dry-run sink otherwise.
fn build_backends(
    gateway_config: GatewayConfig,
) -> lead_reactivator::error::Result<(Arc<dyn MessageGateway>, Arc<dyn SendSink>)> {
    let gateway: Arc<dyn MessageGateway> = Arc::new(WebhookGateway::new(gateway_config)?);

    let sink: Arc<dyn SendSink> = match SmtpConfig::from_env() {
        Some(smtp) => {
            eprintln!("   SMTP: {}:{} as {}", smtp.host, smtp.port, smtp.from_address);
            Arc::new(SmtpSink::new(smtp))
        }
        None => {
            eprintln!("   SMTP: disabled (dry run, messages are only logged)");
            Arc::new(LogSink::new())
        }
    };

    Ok((gateway, sink))
}

/// Console logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lead-reactivator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

/// Wait for Ctrl-C, then abort whatever call is in flight.
async fn shutdown_signal(controller: Arc<BatchController>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    tracing::info!("Shutting down");
    let _ = controller.cancel_in_flight().await;
}
