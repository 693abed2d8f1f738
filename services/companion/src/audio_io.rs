//! cpal-backed microphone and speaker.
//!
//! cpal streams are not `Send`, so each one lives on its own thread for as
//! long as its track or output is open. The microphone callback only downmixes;
//! resampling and framing run on a tokio task. The speaker is a small mixer
//! whose clock is the number of frames the device has pulled.
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use companion_core::capture::{MediaTrack, MicStream, Microphone};
use companion_core::error::LiveError;
use companion_core::playback::{AudioBuffer, AudioOutput, AudioOutputFactory, PlaybackId};
use companion_native_utils::audio::{FrameAccumulator, create_resampler, downmix};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::{FastFixedIn, Resampler};
use tokio::sync::{mpsc, oneshot};

use crate::config::DEVICE_BUFFER_FRAMES;

/// Input frames fed to the microphone resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

// --- Microphone ---

pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

struct CpalTrack {
    stop: Option<std_mpsc::Sender<()>>,
}

impl MediaTrack for CpalTrack {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for CpalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self, sample_rate: u32, frame_size: usize) -> Result<MicStream, LiveError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<f32>>(256);
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let device_name = self.device_name.clone();
        thread::Builder::new()
            .name("mic-stream".to_string())
            .spawn(move || {
                let stream = match build_input_stream(device_name.as_deref(), raw_tx) {
                    Ok((stream, device_rate)) => {
                        let _ = ready_tx.send(Ok(device_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until the track is stopped or dropped.
                let _ = stop_rx.recv();
                drop(stream);
                tracing::info!("Microphone stream closed");
            })
            .map_err(|e| LiveError::Permission(format!("failed to start microphone thread: {e}")))?;

        let device_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(LiveError::Permission(format!("{e:#}"))),
            Err(_) => {
                return Err(LiveError::Permission(
                    "microphone thread exited before opening".to_string(),
                ));
            }
        };

        let mut converter = InputConverter::new(device_rate, sample_rate, frame_size)
            .map_err(|e| LiveError::Permission(format!("{e:#}")))?;
        let (frames_tx, frames) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(mono) = raw_rx.recv().await {
                for frame in converter.push(&mono) {
                    if frames_tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(MicStream {
            frames,
            track: Box::new(CpalTrack {
                stop: Some(stop_tx),
            }),
        })
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    raw_tx: mpsc::Sender<Vec<f32>>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let input = companion_native_utils::device::get_or_default_input(device_name)
        .context("Failed to get audio input device")?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let input_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let input_config = StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(DEVICE_BUFFER_FRAMES)),
    };
    let channels = input_config.channels as usize;
    tracing::info!("Input stream config: {:?}", &input_config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        if let Err(e) = raw_tx.try_send(downmix(data, channels)) {
            tracing::warn!("Dropping microphone samples: {}", e);
        }
    };
    let stream = input
        .build_input_stream(
            &input_config,
            input_data_fn,
            move |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .context("Failed to open the microphone")?;
    stream.play().context("Failed to start the microphone")?;
    Ok((stream, input_config.sample_rate.0))
}

/// Turns mono device-rate samples into fixed-size frames at the target rate.
pub struct InputConverter {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    frames: FrameAccumulator,
}

impl InputConverter {
    pub fn new(device_rate: u32, target_rate: u32, frame_size: usize) -> anyhow::Result<Self> {
        let resampler = if device_rate == target_rate {
            None
        } else {
            Some(create_resampler(
                device_rate as f64,
                target_rate as f64,
                RESAMPLE_CHUNK,
            )?)
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
            frames: FrameAccumulator::new(frame_size),
        })
    }

    pub fn push(&mut self, mono: &[f32]) -> Vec<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return self.frames.push(mono);
        };
        self.pending.extend_from_slice(mono);
        let mut out = Vec::new();
        while self.pending.len() >= resampler.input_frames_next() {
            let chunk: Vec<f32> = self.pending.drain(..resampler.input_frames_next()).collect();
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(resampled) => {
                    if let Some(samples) = resampled.first() {
                        out.extend(self.frames.push(samples));
                    }
                }
                Err(e) => tracing::warn!("Failed to resample microphone audio: {}", e),
            }
        }
        out
    }
}

// --- Speaker ---

struct Voice {
    id: PlaybackId,
    start: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Mono voices scheduled on a frame clock that advances as the device pulls audio.
pub struct Mixer {
    rate: u32,
    position: u64,
    voices: Vec<Voice>,
    ended: mpsc::UnboundedSender<PlaybackId>,
}

impl Mixer {
    pub fn new(rate: u32, ended: mpsc::UnboundedSender<PlaybackId>) -> Self {
        Self {
            rate: rate.max(1),
            position: 0,
            voices: Vec::new(),
            ended,
        }
    }

    pub fn current_time(&self) -> Duration {
        Duration::from_nanos(self.position * 1_000_000_000 / self.rate as u64)
    }

    // Nearest frame, so a time computed from a frame count maps back onto it.
    fn frame_at(&self, at: Duration) -> u64 {
        ((at.as_nanos() * self.rate as u128 + 500_000_000) / 1_000_000_000) as u64
    }

    /// Schedules device-rate mono samples at `at`. A start time in the past plays now.
    pub fn schedule(&mut self, id: PlaybackId, samples: Vec<f32>, at: Duration) {
        let start = self.frame_at(at).max(self.position);
        self.voices.push(Voice { id, start, samples });
    }

    /// Removes a voice without reporting it as ended.
    pub fn stop(&mut self, id: PlaybackId) {
        self.voices.retain(|voice| voice.id != id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Fills one interleaved device buffer and reports voices that finished in it.
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = (data.len() / channels) as u64;
        let first = self.position;
        let last = first + frames;
        data.fill(0.0);

        for voice in &self.voices {
            let from = voice.start.max(first);
            let to = voice.end().min(last);
            for t in from..to {
                let sample = voice.samples[(t - voice.start) as usize];
                let frame = (t - first) as usize * channels;
                for out in &mut data[frame..frame + channels] {
                    *out += sample;
                }
            }
        }
        for out in data.iter_mut() {
            *out = out.clamp(-1.0, 1.0);
        }

        self.position = last;
        let ended = &self.ended;
        self.voices.retain(|voice| {
            let done = voice.end() <= last;
            if done {
                let _ = ended.send(voice.id);
            }
            !done
        });
    }
}

pub struct CpalOutputFactory {
    device_name: Option<String>,
}

impl CpalOutputFactory {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl AudioOutputFactory for CpalOutputFactory {
    async fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Arc<dyn AudioOutput>, LiveError> {
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<Arc<Mutex<Mixer>>>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let device_name = self.device_name.clone();
        thread::Builder::new()
            .name("speaker-stream".to_string())
            .spawn(move || {
                let stream = match build_output_stream(device_name.as_deref(), ended) {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                tracing::info!("Speaker stream closed");
            })
            .map_err(|e| LiveError::Permission(format!("failed to start speaker thread: {e}")))?;

        let mixer = match ready_rx.await {
            Ok(Ok(mixer)) => mixer,
            Ok(Err(e)) => return Err(LiveError::Permission(format!("{e:#}"))),
            Err(_) => {
                return Err(LiveError::Permission(
                    "speaker thread exited before opening".to_string(),
                ));
            }
        };

        Ok(Arc::new(CpalOutput {
            mixer,
            source_rate: sample_rate,
            stop: Mutex::new(Some(stop_tx)),
        }))
    }
}

fn build_output_stream(
    device_name: Option<&str>,
    ended: mpsc::UnboundedSender<PlaybackId>,
) -> anyhow::Result<(cpal::Stream, Arc<Mutex<Mixer>>)> {
    let output = companion_native_utils::device::get_or_default_output(device_name)
        .context("Failed to get audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let output_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(DEVICE_BUFFER_FRAMES)),
    };
    let channels = output_config.channels as usize;
    tracing::info!("Output stream config: {:?}", &output_config);

    let mixer = Arc::new(Mutex::new(Mixer::new(output_config.sample_rate.0, ended)));
    let render_mixer = mixer.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        match render_mixer.lock() {
            Ok(mut mixer) => mixer.render(data, channels),
            Err(_) => data.fill(0.0),
        }
    };
    let stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            move |err| tracing::error!("An error occurred on output stream: {}", err),
            None,
        )
        .context("Failed to open the speaker")?;
    stream.play().context("Failed to start the speaker")?;
    Ok((stream, mixer))
}

pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    source_rate: u32,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> Duration {
        self.mixer
            .lock()
            .map(|mixer| mixer.current_time())
            .unwrap_or_default()
    }

    fn start(&self, id: PlaybackId, buffer: AudioBuffer, at: Duration) {
        let Ok(device_rate) = self.mixer.lock().map(|mixer| mixer.rate) else {
            return;
        };
        let mono = mix_to_mono(&buffer.channels);
        let samples = resample_buffer(mono, self.source_rate, device_rate);
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.schedule(id, samples, at);
        }
    }

    fn stop(&self, id: PlaybackId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn close(&self) {
        let stop = self.stop.lock().ok().and_then(|mut stop| stop.take());
        if let Some(stop) = stop {
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.clear();
            }
            let _ = stop.send(());
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn mix_to_mono(planes: &[Vec<f32>]) -> Vec<f32> {
    match planes {
        [] => Vec::new(),
        [only] => only.clone(),
        [first, rest @ ..] => {
            let count = planes.len() as f32;
            let mut mono = first.clone();
            for plane in rest {
                for (out, sample) in mono.iter_mut().zip(plane) {
                    *out += sample;
                }
            }
            mono.iter_mut().for_each(|s| *s /= count);
            mono
        }
    }
}

/// Resamples one whole buffer, flushing the resampler tail and dropping its delay.
fn resample_buffer(samples: Vec<f32>, from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples;
    }
    let mut resampler = match create_resampler(from as f64, to as f64, samples.len()) {
        Ok(resampler) => resampler,
        Err(e) => {
            tracing::warn!("Failed to create output resampler: {}", e);
            return samples;
        }
    };
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;

    let mut out = Vec::with_capacity(expected + delay);
    match resampler.process(&[samples.as_slice()], None) {
        Ok(resampled) => out.extend(resampled.into_iter().next().unwrap_or_default()),
        Err(e) => {
            tracing::warn!("Failed to resample speaker audio: {}", e);
            return samples;
        }
    }
    if let Ok(tail) = resampler.process_partial(None::<&[Vec<f32>]>, None) {
        out.extend(tail.into_iter().next().unwrap_or_default());
    }
    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    out
}
