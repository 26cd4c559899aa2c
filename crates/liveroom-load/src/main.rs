//! Live-room load harness
//!
//! Runs the live-classroom scenario repeatedly against a session service and
//! prints the aggregate report.
//!
//! # Startup Flow
//!
//! 1. Initialise tracing from `LOG_LEVEL`/`LOG_JSON`
//! 2. Load configuration from environment
//! 3. Sign in every account of the accounts file
//! 4. Build the harness and check the script against the roster
//! 5. Launch the runs; Ctrl+C cancels them, each still reports
//! 6. Print the report and optionally write it as JSON

#![warn(clippy::pedantic)]

use common::config::ObservabilityConfig;
use liveroom_load::accounts::AccountPool;
use liveroom_load::aggregator::ReportAggregator;
use liveroom_load::bootstrap::{SessionBootstrapper, SessionPlan};
use liveroom_load::choreography::{Choreography, ChoreographyEngine, PacingPlan};
use liveroom_load::clients::http::{HttpIdentityProvider, HttpSessionClient};
use liveroom_load::clients::{IdentityProvider, SessionClient};
use liveroom_load::config::Config;
use liveroom_load::entry::EntrySynchronizer;
use liveroom_load::errors::LoadError;
use liveroom_load::pacing::{PacingMode, TokioPacer};
use liveroom_load::runner::Harness;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let vars: HashMap<String, String> = env::vars().collect();
    ObservabilityConfig::from_vars(&vars).init_tracing("liveroom_load");

    info!("Starting live-room load harness");

    let config = Config::from_vars(&vars).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    info!(
        session_service_url = %config.session_service_url,
        teachers = config.num_teachers,
        students = config.num_students,
        repeat = config.repeat,
        parallelism = config.parallelism,
        "Configuration loaded"
    );

    let identity: Arc<dyn IdentityProvider> = Arc::new(HttpIdentityProvider::new(
        &config.identity_service_url,
        config.rpc_timeout,
    )?);
    let client: Arc<dyn SessionClient> = Arc::new(HttpSessionClient::new(
        &config.session_service_url,
        config.rpc_timeout,
    )?);

    let pool = AccountPool::load(&config.accounts_file, identity.as_ref(), config.rpc_timeout)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to load account pool");
            e
        })?;

    let harness = Arc::new(build_harness(&config, Arc::new(pool), identity, client).map_err(
        |e| {
            error!(error = %e, "Scenario cannot run with this configuration");
            e
        },
    )?);

    let process = CancellationToken::new();
    let interrupt = process.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling in-flight runs");
                interrupt.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let report = ReportAggregator::new(config.repeat)
        .with_parallelism(config.parallelism)
        .with_buckets(config.histogram_buckets)
        .run(|_| harness.runner(&process).run())
        .await;

    // Stops process-lifetime watchers.
    process.cancel();

    println!("{report}");

    if let Some(path) = &config.report_path {
        tokio::fs::write(path, serde_json::to_vec_pretty(&report)?).await?;
        info!(path = %path.display(), "Report written");
    }

    Ok(())
}

fn build_harness(
    config: &Config,
    pool: Arc<AccountPool>,
    identity: Arc<dyn IdentityProvider>,
    client: Arc<dyn SessionClient>,
) -> Result<Harness, LoadError> {
    let plan = SessionPlan {
        num_teachers: config.num_teachers,
        num_students: config.num_students,
        course_id: config.course_id.clone(),
        location_id: config.location_id.clone(),
        selection: config.account_selection,
    };
    let bootstrapper = SessionBootstrapper::new(
        pool,
        Arc::clone(&identity),
        Arc::clone(&client),
        plan,
        config.rpc_timeout,
    )?;
    let entry = EntrySynchronizer::new(identity, Arc::clone(&client), config.rpc_timeout)
        .with_max_in_flight(config.max_in_flight);
    let mode = if config.abortable_pacing {
        PacingMode::Abortable
    } else {
        PacingMode::Uninterruptible
    };
    let engine = ChoreographyEngine::new(client, Arc::new(TokioPacer), config.rpc_timeout)
        .with_pacing_mode(mode)
        .with_max_in_flight(config.max_in_flight);
    let script = Choreography::live_classroom(PacingPlan::default().scaled(config.pacing_scale));

    Ok(
        Harness::new(bootstrapper, entry, engine, script, config.rpc_timeout)?
            .with_watch(config.watch_settings())
            .with_deadlines(config.deadlines()),
    )
}
