//! Decode stage of the capture path.
//!
//! Platforms hand over either compressed packets or already-decoded PCM.
//! A [`FrameDecoder`] turns one packet into PCM for the capture transcoder.

use bytes::Bytes;

/// Turns one platform packet into interleaved 16-bit PCM.
pub trait FrameDecoder: Send {
    /// Returns `None` for packets that should be skipped.
    fn decode(&mut self, packet: &[u8]) -> Option<Bytes>;
}

/// Creates one decoder per decode stage.
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn FrameDecoder>;
}

/// Forwards packets unchanged, for platforms that already deliver PCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoderFactory;

struct Passthrough;

impl FrameDecoder for Passthrough {
    fn decode(&mut self, packet: &[u8]) -> Option<Bytes> {
        if packet.is_empty() {
            None
        } else {
            Some(Bytes::copy_from_slice(packet))
        }
    }
}

impl DecoderFactory for PassthroughDecoderFactory {
    fn create(&self) -> Box<dyn FrameDecoder> {
        Box::new(Passthrough)
    }
}

#[cfg(feature = "opus")]
pub use opus::OpusDecoderFactory;

#[cfg(feature = "opus")]
mod opus {
    use super::{DecoderFactory, FrameDecoder, Passthrough};
    use audiopus::coder::Decoder;
    use audiopus::{Channels, SampleRate};
    use bytes::{BufMut, Bytes, BytesMut};

    /// 120 ms at 48 kHz, the longest Opus frame.
    const MAX_FRAME_SAMPLES: usize = 5_760;

    /// Decodes 48 kHz stereo Opus packets.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpusDecoderFactory;

    struct OpusFrameDecoder {
        decoder: Decoder,
        buf: Vec<i16>,
    }

    impl FrameDecoder for OpusFrameDecoder {
        fn decode(&mut self, packet: &[u8]) -> Option<Bytes> {
            if packet.is_empty() {
                return None;
            }
            let samples = match self.decoder.decode(Some(packet), &mut self.buf[..], false) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::debug!("dropping undecodable opus packet: {}", e);
                    return None;
                }
            };
            let interleaved = &self.buf[..samples * 2];
            let mut out = BytesMut::with_capacity(interleaved.len() * 2);
            for sample in interleaved {
                out.put_i16_le(*sample);
            }
            Some(out.freeze())
        }
    }

    impl DecoderFactory for OpusDecoderFactory {
        fn create(&self) -> Box<dyn FrameDecoder> {
            match Decoder::new(SampleRate::Hz48000, Channels::Stereo) {
                Ok(decoder) => Box::new(OpusFrameDecoder {
                    decoder,
                    buf: vec![0; MAX_FRAME_SAMPLES * 2],
                }),
                Err(e) => {
                    tracing::warn!("opus decoder unavailable, forwarding packets as-is: {}", e);
                    Box::new(Passthrough)
                }
            }
        }
    }
}
