use pamlink_frame::FrameAssembler;
use pamlink_signal::{
    AdaptiveDemodulator, BitPacker, ImpairmentModel, LevelMapping, SymbolErrorStats, SymbolWidth,
    WireMode,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{RelayConfig, Stage};
use crate::error::Result;

/// One unit of output produced from inbound bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    /// Bytes as they entered the stage.
    pub original: Vec<u8>,
    /// Bytes to fan out.
    pub delivered: Vec<u8>,
    /// Symbol-level comparison, present when an impairment was applied.
    pub stats: Option<SymbolErrorStats>,
}

/// Per-connection processing state.
///
/// Built for one inbound stream and dropped with it; nothing here is shared.
#[derive(Debug)]
pub struct ConnectionPipeline {
    stage: StageState,
    wire_mode: WireMode,
    width: SymbolWidth,
    impairment: ImpairmentModel,
    rng: ChaCha8Rng,
}

#[derive(Debug)]
enum StageState {
    Forward,
    Frames(FrameAssembler),
    Demodulate {
        demod: AdaptiveDemodulator,
        mapping: LevelMapping,
        packer: BitPacker,
    },
}

impl ConnectionPipeline {
    pub fn new(config: &RelayConfig, impairment: ImpairmentModel, rng: ChaCha8Rng) -> Result<Self> {
        let stage = match config.stage {
            Stage::Forward => StageState::Forward,
            Stage::Frames => StageState::Frames(FrameAssembler::new(&config.frame_config())?),
            Stage::Demodulate => StageState::Demodulate {
                demod: AdaptiveDemodulator::new(config.demod),
                mapping: config.level_mapping,
                packer: BitPacker::new(),
            },
        };
        Ok(Self {
            stage,
            wire_mode: config.wire_mode,
            width: config.symbol_width,
            impairment,
            rng,
        })
    }

    /// Pipeline for the `conn_id`-th connection of a node.
    ///
    /// With a configured seed every connection gets a distinct but
    /// reproducible random stream.
    pub fn for_connection(
        config: &RelayConfig,
        impairment: ImpairmentModel,
        conn_id: u64,
    ) -> Result<Self> {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(conn_id)),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::new(config, impairment, rng)
    }

    /// Run a received chunk through the stage.
    ///
    /// `impair` is the node's error-mode flag at the time of the call.
    pub fn process(&mut self, chunk: &[u8], impair: bool) -> Vec<Hop> {
        let impair = impair && !self.impairment.is_identity();
        let Self {
            stage,
            wire_mode,
            width,
            impairment,
            rng,
        } = self;

        match stage {
            StageState::Forward => {
                if chunk.is_empty() {
                    return Vec::new();
                }
                vec![impair_wire(chunk, impair, impairment, *wire_mode, *width, rng)]
            }
            StageState::Frames(assembler) => assembler
                .feed(chunk)
                .map(|frame| {
                    let hop = impair_wire(frame.payload(), impair, impairment, *wire_mode, *width, rng);
                    let mut delivered = Vec::with_capacity(frame.len());
                    delivered.extend_from_slice(frame.header());
                    delivered.extend_from_slice(&hop.delivered);
                    Hop {
                        original: frame.as_bytes().to_vec(),
                        delivered,
                        stats: hop.stats,
                    }
                })
                .collect(),
            StageState::Demodulate {
                demod,
                mapping,
                packer,
            } => {
                let levels = demod.observe_chunk(chunk);
                let (levels, stats) = if impair {
                    let impaired = impairment.apply(&levels, SymbolWidth::Pam4, rng);
                    let stats = SymbolErrorStats::compare(&levels, &impaired);
                    (impaired, Some(stats))
                } else {
                    (levels, None)
                };
                for level in levels {
                    packer.push(mapping.bits(level), SymbolWidth::Pam4.bits());
                }
                let delivered = packer.take_bytes();
                if delivered.is_empty() {
                    return Vec::new();
                }
                vec![Hop {
                    original: chunk.to_vec(),
                    delivered,
                    stats,
                }]
            }
        }
    }

    /// Input held back waiting for more data: frame bytes or demodulated bits.
    pub fn pending(&self) -> usize {
        match &self.stage {
            StageState::Forward => 0,
            StageState::Frames(assembler) => assembler.buffered(),
            StageState::Demodulate { packer, .. } => packer.pending_bits() as usize,
        }
    }

    /// Whether the demodulator (if any) is still calibrating.
    pub fn warming_up(&self) -> bool {
        matches!(
            &self.stage,
            StageState::Demodulate { demod, .. } if demod.channel().warmup_remaining > 0
        )
    }
}

fn impair_wire(
    bytes: &[u8],
    impair: bool,
    impairment: &ImpairmentModel,
    wire_mode: WireMode,
    width: SymbolWidth,
    rng: &mut ChaCha8Rng,
) -> Hop {
    if !impair {
        return Hop {
            original: bytes.to_vec(),
            delivered: bytes.to_vec(),
            stats: None,
        };
    }
    let delivered = impairment.apply_wire(bytes, wire_mode, width, rng);
    let stats = SymbolErrorStats::compare(&wire_mode.from_wire(bytes), &wire_mode.from_wire(&delivered));
    Hop {
        original: bytes.to_vec(),
        delivered,
        stats: Some(stats),
    }
}

#[cfg(test)]
mod tests {
    use pamlink_signal::DemodulatorConfig;

    use super::*;

    fn pipeline(config: &RelayConfig, impairment: ImpairmentModel) -> ConnectionPipeline {
        ConnectionPipeline::new(config, impairment, ChaCha8Rng::seed_from_u64(11)).unwrap()
    }

    #[test]
    fn forward_passes_chunk_through_when_error_mode_off() {
        let config = RelayConfig::default();
        let mut p = pipeline(&config, ImpairmentModel::CyclicOffset { shift: 1 });
        let hops = p.process(&[0, 1, 2, 3], false);
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].delivered, vec![0, 1, 2, 3]);
        assert!(hops[0].stats.is_none());
        assert!(p.process(&[], true).is_empty());
    }

    #[test]
    fn forward_impairs_when_error_mode_on() {
        let config = RelayConfig::default();
        let mut p = pipeline(&config, ImpairmentModel::CyclicOffset { shift: 1 });
        let hop = p.process(&[0, 1, 2, 3], true).remove(0);
        assert_eq!(hop.original, vec![0, 1, 2, 3]);
        assert_eq!(hop.delivered, vec![1, 2, 3, 0]);
        let stats = hop.stats.unwrap();
        assert_eq!(stats.error_count(), 4);
        assert_eq!(stats.error_percent(), 100.0);
    }

    #[test]
    fn identity_model_never_reports_stats() {
        let config = RelayConfig::default();
        let mut p = pipeline(&config, ImpairmentModel::Identity);
        assert!(p.process(&[3, 3], true)[0].stats.is_none());
    }

    #[test]
    fn packed_forward_impairs_every_pair() {
        let config = RelayConfig {
            wire_mode: WireMode::Packed,
            ..RelayConfig::default()
        };
        let mut p = pipeline(&config, ImpairmentModel::CyclicOffset { shift: 1 });
        // 0b00_01_10_11 -> 0b01_10_11_00
        let hop = p.process(&[0b0001_1011], true).remove(0);
        assert_eq!(hop.delivered, vec![0b0110_1100]);
        assert_eq!(hop.stats.unwrap().compared, 4);
    }

    #[test]
    fn frames_stage_keeps_header_and_buffers_remainder() {
        let config = RelayConfig {
            stage: Stage::Frames,
            frame_len: 6,
            header_len: 2,
            ..RelayConfig::default()
        };
        let mut p = pipeline(&config, ImpairmentModel::CyclicOffset { shift: 1 });

        let mut wire = b"hi".to_vec();
        wire.extend([0, 1, 2, 3]);
        wire.extend(b"ho");
        wire.push(3);

        let hops = p.process(&wire, true);
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].original, wire[..6].to_vec());
        assert_eq!(hops[0].delivered, vec![b'h', b'i', 1, 2, 3, 0]);
        assert_eq!(p.pending(), 3);

        let hops = p.process(&[3, 3, 3], false);
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].delivered, vec![b'h', b'o', 3, 3, 3, 3]);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn demodulate_stage_packs_gray_bits() {
        let config = RelayConfig {
            stage: Stage::Demodulate,
            demod: DemodulatorConfig {
                alpha: 1.0,
                warmup: 2,
            },
            ..RelayConfig::default()
        };
        let mut p = pipeline(&config, ImpairmentModel::Identity);
        assert!(p.warming_up());

        // calibrate on the extremes, then levels 0,1 (4 bits, no byte yet)
        assert!(p.process(&[0, 255, 0, 85], false).is_empty());
        assert!(!p.warming_up());
        assert_eq!(p.pending(), 4);

        // levels 2,3; Gray 00 01 11 10
        let hops = p.process(&[170, 255], false);
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].delivered, vec![0b0001_1110]);
        assert_eq!(hops[0].original, vec![170, 255]);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn demodulate_stage_natural_mapping() {
        let config = RelayConfig {
            stage: Stage::Demodulate,
            demod: DemodulatorConfig {
                alpha: 1.0,
                warmup: 2,
            },
            level_mapping: LevelMapping::Natural,
            ..RelayConfig::default()
        };
        let mut p = pipeline(&config, ImpairmentModel::Identity);
        let hops = p.process(&[0, 255, 0, 85, 170, 255], false);
        assert_eq!(hops[0].delivered, vec![0b0001_1011]);
    }

    #[test]
    fn seeded_connections_are_reproducible() {
        let config = RelayConfig {
            seed: Some(42),
            ..RelayConfig::default()
        };
        let model = ImpairmentModel::SymbolSubstitution { prob: 0.5 };
        let input: Vec<u8> = (0..64).map(|i| i % 4).collect();

        let run = |conn_id| {
            ConnectionPipeline::for_connection(&config, model.clone(), conn_id)
                .unwrap()
                .process(&input, true)
                .remove(0)
                .delivered
        };
        assert_eq!(run(1), run(1));
        assert_ne!(run(1), run(2));
    }
}
