//! Process-global conversation gauges and the `/metrics` endpoint.

use std::sync::LazyLock;

use axum::Router;
use axum::routing::get;
use prometheus::{Encoder, IntGauge, TextEncoder, register_int_gauge};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;

/// Number of currently running exec engines.
pub static EXEC_ENGINES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "botmand_exec_engines_total",
        "Total number of running exec engines."
    )
    .expect("gauge registration")
});

/// Size of the loaded trigger table.
pub static CONVERSATION_TRIGGERS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "botmand_conversation_triggers_total",
        "Total number of loaded conversation triggers."
    )
    .expect("gauge registration")
});

pub static CONVERSATIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "botmand_conversations_total",
        "Total number of current conversations."
    )
    .expect("gauge registration")
});

pub static THREADED_CONVERSATIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "botmand_threaded_conversations_total",
        "Total number of current threaded conversations."
    )
    .expect("gauge registration")
});

pub static CHANNEL_CONVERSATIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "botmand_channel_conversations_total",
        "Total number of current channel conversations."
    )
    .expect("gauge registration")
});

/// Serve the default prometheus registry on `0.0.0.0:<port>/metrics` until
/// the token cancels.
pub async fn serve(port: u16, cancel: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(render));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving metrics");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        error!(error = %err, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
