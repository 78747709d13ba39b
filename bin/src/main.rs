#![allow(clippy::cognitive_complexity)]

use anyhow::{Context, Result, anyhow};

mod startup_health;

use external_api::{ExternalApi, Health};
use key_pool::{KeyPool, PoolConfig, reclaimer::spawn_reclaimer};
use keyd_core::{
    config::{
        cli::{self, Parser},
        trace,
    },
    tokio::{self, runtime::Builder, signal},
    tracing::*,
};
use startup_health::verify_startup_subsystems;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.keyd_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start server"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    let pool = KeyPool::with_config(PoolConfig {
        block_timeout: config.block_timeout(),
        idle_timeout: config.idle_timeout(),
    });
    info!(
        block_timeout = ?config.block_timeout(),
        idle_timeout = ?config.idle_timeout(),
        "lease pool ready"
    );

    // start external api for key operations & healthchecks
    let api = ExternalApi::new(config.api_addr, pool.clone());

    let token = CancellationToken::new();
    debug!("starting reclaimer");
    let mut reclaimer_task = spawn_reclaimer(pool, config.sweep_interval(), token.clone());

    let api_sender = api.sender();
    let mut api_task = api.start(token.clone());

    // Keep health BAD until all startup-critical tasks are confirmed running.
    if let Err(err) = verify_startup_subsystems(&mut api_task, &mut reclaimer_task).await {
        let _ = api_sender.send(Health::Bad).await;
        token.cancel();
        return Err(err);
    }

    debug!("changing health to good after startup checks passed");
    api_sender
        .send(Health::Good)
        .await
        .context("error occurred in changing health status to Good")?;

    // run until ctrl-c, then drain the background tasks
    shutdown_signal(token).await?;
    if let Err(err) = api_task.await {
        error!(?err, "error waiting for web server API");
    }
    if let Err(err) = reclaimer_task.await {
        error!(?err, "error waiting for reclaimer task");
    }
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
