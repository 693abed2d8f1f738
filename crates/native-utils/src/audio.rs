use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of microphone frames sent to the live channel.
pub const INPUT_SAMPLE_RATE: u32 = 16000;
/// Sample rate of the PCM16 audio the live channel sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;
/// Samples per outbound microphone frame.
pub const INPUT_FRAME_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("pcm16 payload has odd byte length {0}")]
    OddLength(usize),
    #[error("pcm16 payload of {samples} samples does not split into {channels} channels")]
    ChannelMismatch { samples: usize, channels: usize },
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Averages interleaved channels down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Quantizes float samples to PCM16 with `round(sample * 32768)`. Out of range
/// values saturate at the i16 bounds; there is no dithering.
pub fn quantize(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).round() as i16)
        .collect()
}

/// Encodes float samples as base64 little-endian PCM16.
pub fn encode_pcm16(pcm32: &[f32]) -> String {
    encode_i16(&quantize(pcm32))
}

/// Encodes a slice of i16 samples into a base64 string.
pub fn encode_i16(pcm16: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16.to_binary())
}

/// Decodes a base64 string into little-endian PCM16 samples.
pub fn decode_i16(base64_fragment: &str) -> Result<Vec<i16>, CodecError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Converts PCM16 samples to floats in [-1, 1) with `sample / 32768`.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Decodes base64 PCM16 and splits interleaved samples into one float buffer per channel.
pub fn decode_planar(base64_fragment: &str, channels: usize) -> Result<Vec<Vec<f32>>, CodecError> {
    let channels = channels.max(1);
    let pcm16 = decode_i16(base64_fragment)?;
    if pcm16.len() % channels != 0 {
        return Err(CodecError::ChannelMismatch {
            samples: pcm16.len(),
            channels,
        });
    }
    let frames = pcm16.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in pcm16.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample as f32 / 32768.0);
        }
    }
    Ok(planes)
}

/// Collects arbitrarily sized callback buffers into frames of exactly `frame_size` samples.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Appends samples and returns every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            frames.push(self.pending.drain(..self.frame_size).collect());
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// A trait for converting audio sample types to a binary representation (Vec<u8>).
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
    }
}
