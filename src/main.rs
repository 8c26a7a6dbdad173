mod api;
mod capture;
mod igmp;
mod link;
mod models;
mod stats;
mod switch;
mod utils;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::handlers::AppState;
use crate::api::routes;
use crate::capture::listener::ReturnToMasterListener;
use crate::igmp::manager::MembershipManager;
use crate::igmp::socket::RawIgmpConnector;
use crate::models::config::AppConfig;
use crate::models::filter::FilterTable;
use crate::stats::collector::StatisticsCollector;
use crate::switch::engine::SwitchEngine;
use crate::switch::installer::TcRuleInstaller;
use crate::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Automatic failover between master and slave multicast sources")]
struct Args {
    /// Path to the JSON configuration file
    #[clap(short, long)]
    config: PathBuf,

    /// Port for the control-plane API, overrides the config file
    #[clap(short, long)]
    port: Option<u16>,

    /// Address the control-plane API binds to
    #[clap(long, default_value = "0.0.0.0")]
    bind: String,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting mcast-failover v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.port = port;
    }
    config.log_summary();

    link::ensure_interface_exists(&config.interface)?;
    let routes_to_install: Vec<Ipv4Addr> = config.filters.iter().map(|f| f.route).collect();
    link::configure(&config.interface, &routes_to_install).context("link setup")?;

    let filters = Arc::new(FilterTable::from_config(&config));

    if let Some(from) = &config.copy_traffic_from {
        link::ensure_interface_exists(from)?;
        link::mirror_traffic(from, &config.interface, &filters);
    }

    let collector = Arc::new(StatisticsCollector::new(config.interface.clone()));
    let sampled = collector
        .sample_once()
        .context("initial traffic statistics sample")?;
    info!("Initial statistics sample found {} counter(s)", sampled);
    let collector_task = collector.spawn(Duration::from_millis(config.stats_frequency_ms));

    let (listener, listener_task) = if config.return_to_master {
        let listener = Arc::new(ReturnToMasterListener::new());
        let capture = ReturnToMasterListener::open_capture(&config.interface)
            .context("opening return-to-master capture")?;
        let task = listener.spawn(capture);
        (Some(listener), Some(task))
    } else {
        info!("Return to master disabled, no listener started");
        (None, None)
    };

    let engine = Arc::new(SwitchEngine::new(
        collector.clone(),
        Arc::new(TcRuleInstaller),
        listener.clone(),
    ));
    engine.install_default_rules(filters.iter());
    for filter in filters.iter().filter(|f| f.auto_switch_enabled()) {
        engine.start_auto_switch(filter);
    }

    let membership = Arc::new(MembershipManager::new(
        Arc::clone(&filters),
        Arc::new(RawIgmpConnector),
        Duration::from_millis(config.igmp_interval_ms),
    ));

    let state = web::Data::new(AppState {
        filters: Arc::clone(&filters),
        engine: Arc::clone(&engine),
        membership: Arc::clone(&membership),
    });

    let bind = format!("{}:{}", args.bind, config.port);
    info!("Starting control plane on {}", bind);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .bind(&bind)
    .with_context(|| format!("binding {}", bind))?
    .run()
    .await?;

    info!("Shutting down");
    engine.shutdown();
    membership.leave_all();
    collector_task.abort();

    if let Some(listener) = listener {
        listener.stop();
    }
    if let Some(task) = listener_task {
        if let Err(e) = task.await {
            warn!("Listener task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
