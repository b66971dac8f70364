use std::sync::Arc;
use tracing::{info, warn};

use chatprobe::{api, core::config::load_probe_config, tools, types::*, AppState};

fn parse_port_from_args() -> Option<u16> {
    let v = flag_value("--port")?;
    v.parse::<u16>().ok()
}

fn port_from_env() -> Option<u16> {
    for k in ["CHATPROBE_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

/// `--name value` or `--name=value`.
fn flag_value(name: &str) -> Option<String> {
    let mut args = std::env::args();
    let prefix = format!("{}=", name);
    while let Some(a) = args.next() {
        if a == name {
            return args.next();
        } else if let Some(rest) = a.strip_prefix(&prefix) {
            return Some(rest.to_string());
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().any(|a| a == name)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = Arc::new(AppState::new(
        AppState::build_http_client()?,
        load_probe_config(),
    ));

    if has_flag("--list-scenarios") {
        for (name, prompts) in state.config.scenarios.iter() {
            println!("{}\t{} prompts", name, prompts.len());
        }
        return Ok(());
    }

    if let Some(scenario) = flag_value("--run") {
        return run_once(state, scenario).await;
    }

    serve(state).await
}

async fn run_once(state: Arc<AppState>, scenario: String) -> anyhow::Result<()> {
    let request = RunRequest {
        scenario: Some(scenario),
        prompts: None,
        chat_url: flag_value("--chat-url"),
    };

    let signal_state = state.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupt received, cancelling run");
        signal_state.shutdown.cancel();
    });

    let report = tools::execute_probe_run(&state, request).await?;

    println!(
        "Run {}: {}/{} replies captured{}",
        report.outcome.run_id,
        report.outcome.captured_count(),
        report.outcome.records.len(),
        if report.outcome.cancelled { " (cancelled)" } else { "" }
    );
    if let Some(path) = &report.transcript_path {
        println!("Transcript: {}", path);
    }
    match (&report.summary, &report.relay_error) {
        (Some(summary), _) => {
            for line in summary.render_lines() {
                println!("{}", line);
            }
        }
        (None, Some(err)) => println!("Analysis: not delivered ({})", err),
        (None, None) => {}
    }

    if report.summary.as_ref().is_some_and(|s| !s.is_success()) {
        std::process::exit(2);
    }
    Ok(())
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    info!("Starting chatprobe service");

    let app = api::router(state.clone());

    let port: u16 = parse_port_from_args()
        .or_else(port_from_env)
        .unwrap_or(5010);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/CHATPROBE_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("chatprobe listening on http://{}", bind_addr);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down; cancelling any active run");
            shutdown_state.shutdown.cancel();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
