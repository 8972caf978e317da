mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestration::channel_runtime::{self, IngestHealth};
use orchestration::clock_discipline::{ClockDiscipline, FileClockDiscipline, NullClockDiscipline};
use orchestration::environment::{Environment, EnvironmentOptions};
use orchestration::fusion_task::{run_fusion_task, FusionTaskOptions};
use orchestration::minute::MinuteContext;
use orchestration::sdr_stream::TcpControlStream;
use parking_lot::Mutex;
use rtp::{Resequencer, ResequencerOptions};
use sdr_client::{OutputEncoding, SdrClient};
use timing::convergence::OscillatorQuality;
use timing::station::ChannelSpec;
use tokio::sync::oneshot;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.channels.is_empty() {
        log::warn!("no channels configured; exiting with nothing to record");
        return Ok(());
    }

    let receiver_location = config.server.receiver_location();
    let specs: Vec<ChannelSpec> = config
        .channels
        .iter()
        .map(|c| {
            ChannelSpec::new(
                c.name.clone(),
                c.center_frequency_hz,
                c.sample_rate_hz,
                c.description.clone(),
                receiver_location.clone(),
            )
        })
        .collect();

    log::info!(
        "resolved channel table: {}",
        specs
            .iter()
            .map(|s| format!("{} ({} MHz)", s.name, s.frequency_mhz()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let env = Environment::new(EnvironmentOptions {
        station_id: config.server.station_id.clone(),
        instrument_id: config.server.instrument_id.clone(),
        archive_root: config.archive.root.clone().into(),
        fusion_data_root: config.fusion.data_root.clone().into(),
        retention_days: config.archive.retention_days,
        shm_path: config.fusion.shm_path.clone().into(),
    });

    let mut shutdown_senders = Vec::new();
    let mut join_handles = Vec::new();

    for (spec, channel_config) in specs.iter().zip(config.channels.iter()) {
        let destination = channel_runtime::channel_destination(&config.server.station_id, &config.server.instrument_id, &spec.name);

        let control = TcpControlStream::connect(config.sdr.control_endpoint.as_str())
            .await
            .with_context(|| format!("connecting to SDR control endpoint {}", config.sdr.control_endpoint))?;
        let mut client = SdrClient::new(control);
        let encoding = if config.sdr.output_encoding == "int16" {
            OutputEncoding::Int16
        } else {
            OutputEncoding::Float32
        };
        let ssrc = channel_runtime::provision(&mut client, spec, destination, &channel_config.preset, encoding)
            .await
            .with_context(|| format!("provisioning SDR channel {}", spec.name))?;
        log::info!("channel {} provisioned at {destination} (ssrc {ssrc})", spec.name);

        let socket = channel_runtime::join_multicast(destination)
            .with_context(|| format!("joining multicast group for channel {}", spec.name))?;
        let resequencer = Resequencer::new(ResequencerOptions::new(spec.sample_rate_hz));
        let writer = channel_runtime::archive_writer_for(&env.archive_root, &spec.name, spec.sample_rate_hz)?;
        let health = Arc::new(Mutex::new(IngestHealth::default()));

        let (ingress_tx, ingress_rx) = oneshot::channel();
        shutdown_senders.push(ingress_tx);
        let sample_rate_hz = spec.sample_rate_hz;
        join_handles.push(tokio::spawn(channel_runtime::run_ingress(
            socket,
            resequencer,
            writer,
            sample_rate_hz,
            health,
            ingress_rx,
        )));

        let minute_ctx = MinuteContext::new(spec.clone(), &env, OscillatorQuality::FreeRunningTcxo)?;
        let (minute_tx, minute_rx) = oneshot::channel();
        shutdown_senders.push(minute_tx);
        let env_for_minute = env.clone();
        join_handles.push(tokio::spawn(orchestration::minute::run_minute_scheduler(
            minute_ctx,
            env_for_minute,
            minute_rx,
        )));
    }

    let discipline: Arc<dyn ClockDiscipline> = if config.fusion.clock_discipline {
        Arc::new(FileClockDiscipline::new(format!("{}.clock_discipline", config.fusion.shm_path)))
    } else {
        Arc::new(NullClockDiscipline)
    };
    let (fusion_tx, fusion_rx) = oneshot::channel();
    shutdown_senders.push(fusion_tx);
    let fusion_options = FusionTaskOptions::new(
        specs.iter().map(|s| s.name.clone()).collect(),
        Duration::from_secs(config.fusion.tick_seconds),
        config.fusion.clock_discipline,
    );
    let env_for_fusion = env.clone();
    join_handles.push(tokio::spawn(async move {
        if let Err(e) = run_fusion_task(env_for_fusion, fusion_options, discipline, fusion_rx).await {
            log::error!("fusion task exited with error: {e:?}");
        }
    }));

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    log::info!("shutdown requested, draining tasks");
    for tx in shutdown_senders {
        let _ = tx.send(());
    }
    for handle in join_handles {
        let _ = handle.await;
    }
    log::info!("shutdown complete");
    Ok(())
}
