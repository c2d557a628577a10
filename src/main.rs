use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use support_desk::api;
use support_desk::channels::{ImapSource, SmtpMailer};
use support_desk::config::DeskConfig;
use support_desk::llm::create_provider;
use support_desk::pipeline::{Desk, Scheduler};
use support_desk::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = DeskConfig::from_env();

    // Initialize tracing; the guard flushes the file writer on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "support-desk.log");
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
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📮 Support Desk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws", config.http_port);
    match &config.imap {
        Some(imap) => eprintln!("   IMAP: {}:{} ({})", imap.host, imap.port, imap.folder),
        None => eprintln!("   IMAP: disabled (IMAP_HOST not set)"),
    }
    match &config.smtp {
        Some(smtp) => eprintln!("   SMTP: {}:{} as {}", smtp.host, smtp.port, smtp.from_address),
        None => eprintln!("   SMTP: disabled (SMTP_HOST not set)"),
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Desk ─────────────────────────────────────────────────────────────
    let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));
    let mut desk = Desk::new(Arc::clone(&db), mailer);
    if let Some(imap) = config.imap.clone() {
        desk = desk.with_source(Arc::new(ImapSource::new(imap)));
    }
    match &config.llm {
        Some(llm_config) => {
            let llm = create_provider(llm_config).context("Failed to create LLM provider")?;
            eprintln!("   AI: {} ({})", llm_config.backend.name(), llm_config.model);
            desk = desk.with_llm(llm);
        }
        None => eprintln!("   AI: disabled (no API key)"),
    }
    let desk = Arc::new(desk);

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&desk),
        config.poll_interval_minutes,
    ));
    let status = scheduler
        .resume(config.scheduler_enabled, config.poll_interval_minutes)
        .await
        .context("Failed to load scheduler settings")?;
    eprintln!(
        "   Scheduler: {} (every {} min)\n",
        if status.running { "running" } else { "stopped" },
        status.interval_minutes
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api::router(Arc::clone(&desk), Arc::clone(&scheduler));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    scheduler.shutdown().await;
    Ok(())
}
