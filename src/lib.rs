pub mod audio;
pub mod directory;
pub mod escalation;
pub mod instructions;
pub mod logging;
pub mod metrics;
pub mod reconnection;
pub mod settings;
pub mod signaling;
pub mod state_machine;
pub mod streaming;
pub mod tools;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use directory::{Directory, StaticDirectory};
use escalation::{
    channels_from_credentials, EscalationAudit, EscalationService, JsonlAuditLog, MemoryAudit,
};
use instructions::TemplateInstructions;
use metrics::RelayMetrics;
use reconnection::ReconnectionManager;
use settings::Settings;
use signaling::{RelayDeps, RelayServer};
use streaming::RealtimeConnector;
use tools::{AlertFamilyTool, ToolRegistry, ALERT_FAMILY};

/// Wire every service from `settings` and serve until Ctrl-C.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let metrics = Arc::new(RelayMetrics::new());

    let directory: Arc<dyn Directory> = match &settings.directory_path {
        Some(path) => Arc::new(
            StaticDirectory::load(path)
                .with_context(|| format!("loading directory {}", path.display()))?,
        ),
        None => {
            log::warn!("No directory_path configured; every identity will be rejected");
            Arc::new(StaticDirectory::empty())
        }
    };

    let connector = Arc::new(
        RealtimeConnector::from_settings(&settings.backend)
            .context("backend is not configured (set GEMINI_API_KEY)")?,
    );

    let audit: Arc<dyn EscalationAudit> = match settings
        .audit_log_path
        .clone()
        .or_else(settings::default_audit_log_path)
    {
        Some(path) => {
            log::info!("Escalation audit log: {}", path.display());
            Arc::new(JsonlAuditLog::new(path))
        }
        None => {
            log::warn!("No data directory; escalation results are kept in memory only");
            Arc::new(MemoryAudit::new())
        }
    };

    let escalation = Arc::new(EscalationService::new(
        channels_from_credentials(&settings.credentials),
        audit,
        settings.escalation.clone(),
        metrics.clone(),
    ));

    let mut tools = ToolRegistry::new();
    tools.register(
        ALERT_FAMILY,
        Arc::new(AlertFamilyTool::new(
            escalation.clone(),
            directory.clone(),
            shutdown.clone(),
        )),
    );

    let server = RelayServer::new(
        RelayDeps {
            directory,
            connector,
            instructions: Arc::new(TemplateInstructions::new(
                settings.backend.instruction_template.clone(),
            )),
            tools: Arc::new(tools),
            escalation,
            reconnection: Arc::new(ReconnectionManager::from_settings(&settings.reconnection)),
            metrics,
        },
        &settings,
        shutdown.clone(),
    );

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", settings.listen_addr))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Ctrl-C received, shutting down");
                signal.cancel();
            }
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.serve(listener).await?;
    Ok(())
}
