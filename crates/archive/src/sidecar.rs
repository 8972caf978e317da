use serde::{Deserialize, Serialize};

use rtp::GapInterval;

/// Stream-quality counters shared verbatim between the archive sidecar and
/// the timing SHM snapshot: `radiod_health`-style silence detection reads
/// the same counters the archive already tracks, so this is one type
/// rather than two.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamHealth {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_ooo: u64,
    pub resyncs: u64,
}

impl StreamHealth {
    pub fn merge(&mut self, other: &StreamHealth) {
        self.packets_received += other.packets_received;
        self.packets_dropped += other.packets_dropped;
        self.packets_ooo += other.packets_ooo;
        self.resyncs += other.resyncs;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapRecord {
    pub rtp_start: u32,
    pub length: u32,
    pub packets_lost: u32,
    pub fill: String,
}

impl From<&GapInterval> for GapRecord {
    fn from(gap: &GapInterval) -> Self {
        Self {
            rtp_start: gap.rtp_start,
            length: gap.len(),
            packets_lost: gap.lost_packets,
            fill: "zero".to_string(),
        }
    }
}

/// The JSON sidecar rewritten on rollover and on graceful shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub channel: String,
    pub first_rtp_timestamp: u32,
    pub first_utc_seconds: f64,
    pub sample_rate: u32,
    pub sample_count: u64,
    pub gaps: Vec<GapRecord>,
    pub stream_health: StreamHealth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_stable_field_names() {
        let sidecar = Sidecar {
            channel: "WWV_10".into(),
            first_rtp_timestamp: 0,
            first_utc_seconds: 1_700_000_000.0,
            sample_rate: 20_000,
            sample_count: 72_000_000,
            gaps: vec![GapRecord {
                rtp_start: 100,
                length: 50,
                packets_lost: 1,
                fill: "zero".into(),
            }],
            stream_health: StreamHealth {
                packets_received: 140_000,
                packets_dropped: 1,
                packets_ooo: 0,
                resyncs: 0,
            },
        };
        let json = serde_json::to_string(&sidecar).unwrap();
        assert!(json.contains("\"first_rtp_timestamp\":0"));
        assert!(json.contains("\"packets_lost\":1"));
        let back: Sidecar = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sample_count, 72_000_000);
    }
}
