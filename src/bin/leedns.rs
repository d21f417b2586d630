use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use leedns::config::{Cli, Config, ListenerConfig, ListenerKind};
use leedns::listener;
use leedns::resolver::Resolver;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration from {:?}: {err}", cli.config);
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.log_level.as_deref());

    let resolver = match config.build_resolver() {
        Ok(resolver) => resolver,
        Err(err) => {
            error!(%err, "failed to build resolver");
            return ExitCode::FAILURE;
        }
    };

    leedns::recovery::spawn(Arc::clone(resolver.pool()));

    for entry in &config.listener {
        spawn_listener(entry, Arc::clone(&resolver));
    }

    info!("leedns running");
    await_shutdown().await;
    info!("leedns shutting down");
    ExitCode::SUCCESS
}

fn init_logging(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn spawn_listener(entry: &ListenerConfig, resolver: Arc<Resolver>) {
    let entry = entry.clone();
    tokio::spawn(async move {
        let addr: SocketAddr = match entry.addr.parse() {
            Ok(addr) => addr,
            Err(err) => {
                error!(addr = %entry.addr, %err, "invalid listener address");
                return;
            }
        };

        let result = match entry.kind {
            ListenerKind::Udp => listener::serve_udp(addr, resolver).await,
            ListenerKind::Tcp => listener::serve_tcp(addr, resolver).await,
            ListenerKind::Tls | ListenerKind::TcpTls => {
                match (&entry.certfile, &entry.keyfile) {
                    (Some(cert), Some(key)) => {
                        listener::serve_dot(addr, cert, key, resolver).await
                    }
                    _ => {
                        error!(addr = %entry.addr, "dot listener requires certfile and keyfile");
                        return;
                    }
                }
            }
            ListenerKind::Http => {
                listener::serve_doh_plain(addr, entry.http_path.clone(), resolver).await
            }
            ListenerKind::Https => match (&entry.certfile, &entry.keyfile) {
                (Some(cert), Some(key)) => {
                    listener::serve_doh_tls(addr, cert, key, entry.http_path.clone(), resolver)
                        .await
                }
                _ => {
                    error!(addr = %entry.addr, "doh listener requires certfile and keyfile");
                    return;
                }
            },
        };

        if let Err(err) = result {
            error!(addr = %entry.addr, %err, "listener failed to bind");
        }
    });
}

#[cfg(unix)]
async fn await_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn await_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
