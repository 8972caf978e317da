use crate::{gap::GapInterval, SampleBlock};

/// Signed difference `a - b` of two 16-bit RTP sequence numbers, correct
/// across wraparound within a window of ±32768.
fn seq_diff(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

/// Tuning knobs for one [`Resequencer`] instance. Defaults: a 64-packet
/// reorder window and a 60-second forced resync.
#[derive(Debug, Clone, Copy)]
pub struct ResequencerOptions {
    /// Ring capacity in packets. A packet arriving more than this many
    /// sequence numbers ahead of the expected one is treated as a gap
    /// rather than buffered.
    pub ring_size: u16,
    /// Forward jump, in samples, beyond which the gap is treated as a
    /// resync (ring flushed) rather than an ordinary gap-fill.
    pub max_gap_samples: u32,
    pub sample_rate_hz: u32,
}

impl ResequencerOptions {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            ring_size: 64,
            max_gap_samples: sample_rate_hz as u32 * 60,
            sample_rate_hz,
        }
    }
}

/// Output of feeding one packet to the [`Resequencer`]: zero or more
/// contiguous sample blocks and gap records, in emission order.
#[derive(Debug, Clone)]
pub enum Emission {
    Samples(SampleBlock),
    Gap(GapInterval),
}

#[derive(Debug, Clone, Default)]
pub struct ResequencerStats {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_ooo: u64,
    pub resyncs: u64,
}

struct Pending {
    sequence_number: u16,
    block: SampleBlock,
}

/// Reorders packets for one channel (one SSRC) into a contiguous,
/// gap-annotated sample timeline.
///
/// Invariant: every [`Emission::Samples`] this resequencer produces is
/// sample-contiguous with the one before it once gap-fills are accounted
/// for, and RTP timestamps across emissions are monotonically
/// non-decreasing. No packet is delivered twice.
pub struct Resequencer {
    options: ResequencerOptions,
    ring: Vec<Option<Pending>>,
    next_sequence: Option<u16>,
    next_timestamp: u32,
    samples_per_packet: u32,
    stats: ResequencerStats,
}

impl Resequencer {
    pub fn new(options: ResequencerOptions) -> Self {
        let ring_size = options.ring_size as usize;
        Self {
            options,
            ring: (0..ring_size).map(|_| None).collect(),
            next_sequence: None,
            next_timestamp: 0,
            samples_per_packet: 0,
            stats: ResequencerStats::default(),
        }
    }

    pub fn stats(&self) -> &ResequencerStats {
        &self.stats
    }

    fn ring_slot(&self, sequence_number: u16) -> usize {
        sequence_number as usize % self.ring.len()
    }

    /// Feeds one packet's decoded header and samples into the resequencer,
    /// returning the emissions (if any) it produces.
    pub fn push(
        &mut self,
        sequence_number: u16,
        rtp_timestamp: u32,
        samples: Vec<num_complex::Complex32>,
        arrival_wallclock: Option<f64>,
    ) -> Vec<Emission> {
        self.stats.packets_received += 1;
        if !samples.is_empty() {
            self.samples_per_packet = samples.len() as u32;
        }

        let block = SampleBlock {
            rtp_timestamp,
            samples,
            arrival_wallclock,
        };

        let Some(expected) = self.next_sequence else {
            self.next_sequence = Some(sequence_number.wrapping_add(1));
            self.next_timestamp = block.end_timestamp();
            return vec![Emission::Samples(block)];
        };

        let diff = seq_diff(sequence_number, expected);

        if diff < 0 {
            // Older than expected: duplicate or stale retransmit.
            self.stats.packets_ooo += 1;
            return Vec::new();
        }

        if diff == 0 {
            self.next_timestamp = block.end_timestamp();
            self.next_sequence = Some(expected.wrapping_add(1));
            let mut out = vec![Emission::Samples(block)];
            out.extend(self.drain_ready());
            return out;
        }

        if (diff as u32) < self.ring.len() as u32 {
            self.stats.packets_ooo += 1;
            let slot = self.ring_slot(sequence_number);
            self.ring[slot] = Some(Pending {
                sequence_number,
                block,
            });
            return Vec::new();
        }

        // Forward jump beyond the reorder window: declare a gap. A jump
        // larger than max_gap_samples is a resync: drop whatever is
        // buffered, it's aged out regardless.
        let jump_samples = crate::rtp_diff(rtp_timestamp, self.next_timestamp).max(0) as u32;
        let is_resync = jump_samples > self.options.max_gap_samples;
        if is_resync {
            self.flush_ring();
            self.stats.resyncs += 1;
        }

        let mut out = Vec::new();
        if rtp_timestamp != self.next_timestamp {
            let gap_start = self.next_timestamp;
            let gap = GapInterval::new(gap_start, rtp_timestamp, self.samples_per_packet.max(1));
            out.push(Emission::Samples(SampleBlock::zero_fill(gap_start, gap.len())));
            out.push(Emission::Gap(gap));
        }
        self.next_timestamp = block.end_timestamp();
        self.next_sequence = Some(sequence_number.wrapping_add(1));
        out.push(Emission::Samples(block));
        out.extend(self.drain_ready());
        out
    }

    /// Drains consecutive buffered packets that now match `next_sequence`.
    fn drain_ready(&mut self) -> Vec<Emission> {
        let mut out = Vec::new();
        loop {
            let Some(expected) = self.next_sequence else {
                break;
            };
            let slot = self.ring_slot(expected);
            let matches = self.ring[slot]
                .as_ref()
                .is_some_and(|p| p.sequence_number == expected);
            if !matches {
                break;
            }
            let pending = self.ring[slot].take().unwrap();
            self.next_timestamp = pending.block.end_timestamp();
            self.next_sequence = Some(expected.wrapping_add(1));
            out.push(Emission::Samples(pending.block));
        }
        out
    }

    fn flush_ring(&mut self) {
        for slot in self.ring.iter_mut() {
            *slot = None;
        }
    }
}
