//! Opus codec wrappers for the outbound and inbound audio tracks

use audiopus::coder::{Decoder, Encoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate};
use parking_lot::Mutex;

use voice_client_core::SessionError;

/// Maximum encoded opus packet size we allocate for.
const MAX_PACKET_BYTES: usize = 1500;

/// Decode buffer: one maximum-length (120 ms) opus frame at 48 kHz.
const MAX_DECODED_SAMPLES: usize = 5760;

/// Opus accepts 8/12/16/24/48 kHz only.
fn opus_rate(sample_rate_hz: u32) -> Result<SampleRate, SessionError> {
    match sample_rate_hz {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(SessionError::Media(format!(
            "unsupported opus sample rate: {other} Hz"
        ))),
    }
}

/// Mono opus encoder for fixed-duration capture frames.
#[derive(Debug)]
pub struct OpusEncoder {
    encoder: Mutex<Encoder>,
    frame_len: usize,
}

impl OpusEncoder {
    /// Create an encoder for the given capture rate and frame
    /// duration. Opus accepts 8/12/16/24/48 kHz only.
    pub fn new(sample_rate_hz: u32, frame_ms: u32) -> Result<Self, SessionError> {
        let encoder = Encoder::new(opus_rate(sample_rate_hz)?, Channels::Mono, Application::Voip)
            .map_err(|e| SessionError::Media(format!("opus encoder init: {e}")))?;

        Ok(Self {
            encoder: Mutex::new(encoder),
            frame_len: (sample_rate_hz * frame_ms / 1000) as usize,
        })
    }

    /// Samples expected per frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Encode one frame of f32 PCM into an opus packet.
    pub fn encode(&self, samples: &[f32]) -> Result<Vec<u8>, SessionError> {
        if samples.len() != self.frame_len {
            return Err(SessionError::Media(format!(
                "opus frame length {} (expected {})",
                samples.len(),
                self.frame_len
            )));
        }

        let mut packet = vec![0u8; MAX_PACKET_BYTES];
        let written = self
            .encoder
            .lock()
            .encode_float(samples, &mut packet)
            .map_err(|e| SessionError::Media(format!("opus encode: {e}")))?;
        packet.truncate(written);
        Ok(packet)
    }
}

/// Mono opus decoder for the inbound remote track.
pub struct OpusDecoder {
    decoder: Mutex<Decoder>,
    /// Samples concealed per lost packet (one 20 ms frame).
    plc_len: usize,
}

impl OpusDecoder {
    pub fn new(sample_rate_hz: u32) -> Result<Self, SessionError> {
        let decoder = Decoder::new(opus_rate(sample_rate_hz)?, Channels::Mono)
            .map_err(|e| SessionError::Media(format!("opus decoder init: {e}")))?;

        Ok(Self {
            decoder: Mutex::new(decoder),
            plc_len: (sample_rate_hz / 50) as usize,
        })
    }

    /// Decode one opus packet into f32 PCM.
    pub fn decode(&self, packet: &[u8]) -> Result<Vec<f32>, SessionError> {
        let mut pcm = vec![0.0f32; MAX_DECODED_SAMPLES];
        let signals = MutSignals::try_from(&mut pcm)
            .map_err(|e| SessionError::Media(format!("opus decode buffer: {e}")))?;
        let packet = Packet::try_from(packet)
            .map_err(|e| SessionError::Media(format!("opus packet: {e}")))?;
        let written = self
            .decoder
            .lock()
            .decode_float(Some(packet), signals, false)
            .map_err(|e| SessionError::Media(format!("opus decode: {e}")))?;
        pcm.truncate(written);
        Ok(pcm)
    }

    /// Conceal one lost packet.
    pub fn decode_plc(&self) -> Result<Vec<f32>, SessionError> {
        let mut pcm = vec![0.0f32; self.plc_len];
        let signals = MutSignals::try_from(&mut pcm)
            .map_err(|e| SessionError::Media(format!("opus decode buffer: {e}")))?;
        let written = self
            .decoder
            .lock()
            .decode_float(None::<Packet>, signals, false)
            .map_err(|e| SessionError::Media(format!("opus plc: {e}")))?;
        pcm.truncate(written);
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_valid_frame() {
        let encoder = OpusEncoder::new(48_000, 20).unwrap();
        assert_eq!(encoder.frame_len(), 960);

        let frame: Vec<f32> = (0..960).map(|i| (i as f32 * 0.01).sin() * 0.3).collect();
        let packet = encoder.encode(&frame).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() <= MAX_PACKET_BYTES);
    }

    #[test]
    fn test_encode_rejects_wrong_frame_length() {
        let encoder = OpusEncoder::new(48_000, 20).unwrap();
        let err = encoder.encode(&[0.0; 100]).unwrap_err();
        assert!(matches!(err, SessionError::Media(_)));
    }

    #[test]
    fn test_rejects_non_opus_rate() {
        let err = OpusEncoder::new(44_100, 20).unwrap_err();
        assert!(matches!(err, SessionError::Media(_)));
    }

    #[test]
    fn test_decode_recovers_frame_length() {
        let encoder = OpusEncoder::new(48_000, 20).unwrap();
        let decoder = OpusDecoder::new(48_000).unwrap();

        let frame: Vec<f32> = (0..960).map(|i| (i as f32 * 0.02).sin() * 0.4).collect();
        let packet = encoder.encode(&frame).unwrap();
        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), 960);
    }

    #[test]
    fn test_plc_conceals_one_frame() {
        let decoder = OpusDecoder::new(48_000).unwrap();
        let concealed = decoder.decode_plc().unwrap();
        assert_eq!(concealed.len(), 960);
    }
}
