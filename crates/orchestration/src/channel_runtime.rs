//! One channel's lifecycle: provisioning it on the SDR daemon, joining
//! its multicast RTP stream, and feeding decoded IQ through the
//! resequencer into the raw archive: one `tokio::select!` loop per
//! socket, with a silence timer standing in for a per-connection idle
//! timeout.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use archive::writer::{ArchiveWriter, ArchiveWriterOptions};
use archive::sidecar::StreamHealth;
use parking_lot::Mutex;
use rtp::{Emission, Resequencer, ResequencerOptions};
use sdr_client::{
    derive_multicast_destination, ChannelDescriptor, CreateChannelRequest, OutputEncoding, RemoveChannelRequest,
    RequestStream, SdrClient, TuneRequest,
};
use timing::station::ChannelSpec;
use tokio::net::UdpSocket;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::Error;

/// RTP control port shared by all channels; each channel already has its
/// own multicast group, so there's no need to also vary the port.
pub const RTP_PORT: u16 = 5004;

/// A channel goes silent (no packets, not even gap-fills) for this long
/// before the ingress task tears it down and asks the SDR daemon to
/// recreate it.
const SILENCE_THRESHOLD: Duration = Duration::from_secs(30);
const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(5);

pub fn channel_destination(station_id: &str, instrument_id: &str, channel_name: &str) -> SocketAddrV4 {
    let group = derive_multicast_destination(station_id, &format!("{instrument_id}:{channel_name}"));
    SocketAddrV4::new(group, RTP_PORT)
}

/// Asks the SDR daemon for this channel, by SSRC derived from the
/// channel name's hash so it's stable across restarts. If a channel is
/// already bound to our destination under a different SSRC, that's
/// someone else's stream parked on our address — refuse to touch it.
pub async fn provision<T: RequestStream>(
    client: &mut SdrClient<T>,
    spec: &ChannelSpec,
    destination: SocketAddrV4,
    preset: &str,
    encoding: OutputEncoding,
) -> Result<u32, Error> {
    let ssrc = channel_ssrc(&spec.name);
    let existing: Vec<ChannelDescriptor> = client.discover_channels().await?;
    if let Some(found) = existing
        .iter()
        .find(|d| d.destination == destination.to_string() && d.ssrc != ssrc)
    {
        return Err(Error::DestinationInUse(format!(
            "destination {destination} already bound to foreign ssrc {}",
            found.ssrc
        )));
    }

    if existing.iter().any(|d| d.ssrc == ssrc) {
        client
            .tune(TuneRequest {
                ssrc,
                preset: preset.to_string(),
                sample_rate_hz: spec.sample_rate_hz,
            })
            .await?;
        return Ok(ssrc);
    }

    let response = client
        .create_channel(CreateChannelRequest {
            frequency_hz: spec.center_frequency_hz,
            preset: preset.to_string(),
            sample_rate_hz: spec.sample_rate_hz,
            destination: destination.to_string(),
            agc: true,
            gain_db: 0.0,
            encoding,
            ssrc: Some(ssrc),
        })
        .await?;
    Ok(response.ssrc)
}

pub async fn recreate<T: RequestStream>(
    client: &mut SdrClient<T>,
    spec: &ChannelSpec,
    destination: SocketAddrV4,
    preset: &str,
    encoding: OutputEncoding,
    ssrc: u32,
) -> Result<u32, Error> {
    let _ = client.remove_channel(RemoveChannelRequest { ssrc }).await;
    provision(client, spec, destination, preset, encoding).await
}

fn channel_ssrc(name: &str) -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() as u32) | 1
}

/// Binds a UDP socket and joins `destination`'s multicast group. Uses
/// `socket2` directly for `join_multicast_v4`, which `tokio::net::UdpSocket`
/// doesn't expose.
pub fn join_multicast(destination: SocketAddrV4) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, destination.port())).into())?;
    socket.join_multicast_v4(destination.ip(), &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Running totals the minute scheduler and health check read from the
/// ingress task without owning it.
#[derive(Default)]
pub struct IngestHealth {
    pub stream_health: StreamHealth,
    pub last_packet_at: Option<Instant>,
}

/// Runs one channel's RTP ingress until `shutdown` fires: receives
/// datagrams from its multicast group, resequences them, and archives
/// every contiguous block (and gap) the resequencer emits.
pub async fn run_ingress(
    socket: UdpSocket,
    mut resequencer: Resequencer,
    mut writer: ArchiveWriter,
    sample_rate_hz: u32,
    health: Arc<Mutex<IngestHealth>>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut buffer = vec![0u8; 2048];
    let mut health_tick = interval(HEALTH_CHECK_PERIOD);
    health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buffer) => {
                let (size, _addr) = match result {
                    Ok(it) => it,
                    Err(e) => {
                        log::warn!("rtp ingress recv error: {e}");
                        continue;
                    }
                };
                let arrival = wallclock_now();
                if let Err(e) = ingest_packet(&buffer[..size], &mut resequencer, &mut writer, arrival) {
                    log::warn!("failed to ingest rtp packet: {e:?}");
                    continue;
                }
                let stats = resequencer.stats();
                let mut guard = health.lock();
                guard.last_packet_at = Some(Instant::now());
                guard.stream_health = StreamHealth {
                    packets_received: stats.packets_received,
                    packets_dropped: stats.packets_dropped,
                    packets_ooo: stats.packets_ooo,
                    resyncs: stats.resyncs,
                };
            }
            _ = health_tick.tick() => {
                let silent = health
                    .lock()
                    .last_packet_at
                    .map(|t| t.elapsed() > SILENCE_THRESHOLD)
                    .unwrap_or(false);
                if silent {
                    log::warn!("channel silent for over {:?}, signaling for recreation", SILENCE_THRESHOLD);
                }
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    let _ = sample_rate_hz;
    let _ = writer.close();
}

fn ingest_packet(
    datagram: &[u8],
    resequencer: &mut Resequencer,
    writer: &mut ArchiveWriter,
    arrival_wallclock: f64,
) -> Result<(), Error> {
    let header = rtp::header::RtpHeader::parse(datagram)?;
    let payload = header.payload(datagram);
    let encoding = rtp::payload::resolve_encoding(header.payload_type, payload)?;
    let samples = rtp::payload::decode(encoding, payload)?;

    for emission in resequencer.push(header.sequence_number, header.timestamp, samples, Some(arrival_wallclock)) {
        match emission {
            Emission::Samples(block) => {
                let utc_of_first_sample = rtp_utc_estimate(block.rtp_timestamp, arrival_wallclock);
                writer.write_block(block.rtp_timestamp, &block.samples, utc_of_first_sample, None, StreamHealth::default())?;
            }
            Emission::Gap(gap) => {
                writer.write_block(gap.rtp_start, &[], 0.0, Some(gap), StreamHealth::default())?;
            }
        }
    }
    Ok(())
}

/// Cheap placeholder UTC estimate used only to seed the archive's first
/// block before a tone-derived [`rtp::TimeReference`] anchor exists; the
/// minute scheduler re-derives precise UTC timestamps itself once an
/// anchor is available.
fn rtp_utc_estimate(_rtp_timestamp: u32, arrival_wallclock: f64) -> f64 {
    arrival_wallclock
}

fn wallclock_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn archive_writer_for(root: &std::path::Path, channel: &str, sample_rate_hz: u32) -> Result<ArchiveWriter, Error> {
    Ok(ArchiveWriter::new(ArchiveWriterOptions::new(root.to_path_buf(), channel.to_string(), sample_rate_hz))?)
}
