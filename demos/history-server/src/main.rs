//! Example server streaming an incrementally loaded file history.
//!
//! Run with: cargo run -p history-server-demo
//!
//! Then open http://localhost:3000 in your browser and press "Refresh".
//! Set `REVLOG_CONFIG` to a JSON session configuration to change batching,
//! e.g. `REVLOG_CONFIG='{"max_records": 50}'`. Set `REVLOG_FAIL_AFTER` to a
//! revision number to watch a producer failure keep the partial history.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use axum::{Router, response::Html, routing::get};
use revlog_core::{ProducerError, SessionConfig, SnapshotStore};
use revlog_session::{RecordProducer, RefreshOutcome, SessionController};
use revlog_transport::websocket::{RefreshHook, create_history_router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One entry of the synthetic history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Revision {
    number: u32,
    author: &'static str,
    message: String,
}

/// Pretends to walk a repository: a cached head first, then older
/// revisions trickling in. Fails part-way when `fail_after` is set.
struct SyntheticHistory {
    cached: u32,
    total: u32,
    delay: Duration,
    fail_after: Option<u32>,
}

impl SyntheticHistory {
    fn revision(number: u32) -> Revision {
        const AUTHORS: [&str; 3] = ["ada", "grace", "linus"];
        Revision {
            number,
            author: AUTHORS[number as usize % AUTHORS.len()],
            message: format!("Change #{number}"),
        }
    }
}

#[async_trait]
impl RecordProducer<Revision> for SyntheticHistory {
    async fn produce(&self, sink: &SessionController<Revision>) -> Result<(), ProducerError> {
        let cached = (0..self.cached).map(Self::revision).collect();
        sink.report_initial(cached)
            .await
            .map_err(|e| ProducerError::new(e.to_string()))?;

        for number in self.cached..self.total {
            if self.fail_after == Some(number) {
                return Err(ProducerError::new("repository connection lost"));
            }
            tokio::time::sleep(self.delay).await;
            sink.accept_record(Self::revision(number))
                .await
                .map_err(|e| ProducerError::new(e.to_string()))?;
        }
        Ok(())
    }
}

fn load_config() -> anyhow::Result<SessionConfig> {
    match std::env::var("REVLOG_CONFIG") {
        Ok(json) => SessionConfig::from_json(&json).context("invalid REVLOG_CONFIG"),
        Err(_) => Ok(SessionConfig::default().with_max_records(200)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    tracing::info!(?config, "Loaded session configuration");

    let store = Arc::new(SnapshotStore::<Revision>::new());
    let (controller, _consumer_task) = SessionController::new(&config, Arc::clone(&store))?;
    let controller = Arc::new(controller);

    let producer: Arc<dyn RecordProducer<Revision>> = Arc::new(SyntheticHistory {
        cached: 10,
        total: 300,
        delay: Duration::from_millis(15),
        fail_after: std::env::var("REVLOG_FAIL_AFTER")
            .ok()
            .and_then(|v| v.parse().ok()),
    });

    let on_refresh: RefreshHook = Arc::new(move || {
        let refresh = controller.spawn_refresh(Arc::clone(&producer));
        tokio::spawn(async move {
            match refresh.await {
                Ok(Ok(RefreshOutcome::Completed)) => tracing::info!("Refresh completed"),
                Ok(Ok(RefreshOutcome::Failed(e))) => tracing::warn!("Refresh failed: {e}"),
                Ok(Err(e)) => tracing::warn!("Refresh rejected: {e}"),
                Err(e) => tracing::error!("Refresh task panicked: {e}"),
            }
        });
    });

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_history_router(store, on_refresh))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>File History</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        .status {
            color: #888;
            font-size: 14px;
            margin-bottom: 10px;
        }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        .failure { color: #e66; }
        table { border-collapse: collapse; width: 100%; }
        td { padding: 2px 8px; font-family: Menlo, Monaco, monospace; font-size: 13px; }
    </style>
</head>
<body>
    <h1>File History</h1>
    <div class="status" id="status">Connecting...</div>
    <button id="refresh">Refresh</button>
    <div class="failure" id="failure"></div>
    <table id="history"></table>

    <script>
        const status = document.getElementById('status');
        const failure = document.getElementById('failure');
        const table = document.getElementById('history');
        let ws;
        let cycle = null;

        function render(records) {
            table.innerHTML = '';
            for (const r of records) {
                const row = table.insertRow();
                row.insertCell().textContent = r.number;
                row.insertCell().textContent = r.author;
                row.insertCell().textContent = r.message;
            }
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                try {
                    const msg = JSON.parse(event.data);
                    if (msg.type === 'snapshot') {
                        if (msg.cycle !== cycle) {
                            cycle = msg.cycle;
                            failure.textContent = '';
                        }
                        status.textContent = `Loading... ${msg.records.length} revisions`;
                        render(msg.records);
                    } else if (msg.type === 'finalized') {
                        status.textContent = `Loaded ${table.rows.length} revisions`;
                    } else if (msg.type === 'failure') {
                        failure.textContent = `Could not load file history: ${msg.message}`;
                    }
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        document.getElementById('refresh').onclick = () => {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify({ type: 'refresh' }));
            }
        };

        // Start connection
        connect();
    </script>
</body>
</html>
"#;
