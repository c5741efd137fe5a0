//! Native audio device access
//!
//! cpal-backed implementations of the capability and media seams.
//! The cpal stream is not `Send`, so capture runs on a dedicated
//! thread that owns it; the async side talks to it through channels
//! and atomics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use async_trait::async_trait;
use voice_client_core::{
    now_ms, AudioConstraints, AudioFrame, AudioInput, CapabilityProbe, CapabilitySnapshot,
    MediaSource, SessionError,
};

/// Capture rates opus accepts, preferred order.
const OPUS_RATES: [u32; 4] = [48_000, 24_000, 16_000, 8_000];

/// Captured-frame duration in milliseconds.
const FRAME_MS: u32 = 20;

/// Frames buffered between the capture thread and the async side.
const FRAME_QUEUE: usize = 32;

/// Reports host capabilities without touching any device state.
pub struct NativeCapabilityProbe;

impl CapabilityProbe for NativeCapabilityProbe {
    fn probe(&self) -> CapabilitySnapshot {
        let media_capture = cpal::default_host().default_input_device().is_some();
        CapabilitySnapshot {
            // The bundled WebRTC and DSP stacks are always present in
            // a native build; only the microphone can be missing.
            peer_connection: true,
            media_capture,
            audio_processing: true,
        }
    }
}

/// Acquires the default input device through cpal.
pub struct CpalMediaSource;

#[async_trait]
impl MediaSource for CpalMediaSource {
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn AudioInput>, SessionError> {
        // Processing flags are accepted for API symmetry; the host
        // capture path has no per-stream DSP toggles to map them to.
        debug!(constraints = ?constraints, "opening default input device");
        CpalAudioInput::open().await
    }
}

/// A live cpal capture stream exposed as 20 ms mono frames.
pub struct CpalAudioInput {
    sample_rate: u32,
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<AudioFrame>>>,
    frames: tokio::sync::Mutex<mpsc::Receiver<AudioFrame>>,
    ended_rx: watch::Receiver<bool>,
}

impl CpalAudioInput {
    async fn open() -> Result<Arc<dyn AudioInput>, SessionError> {
        let enabled = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ended_tx, ended_rx) = watch::channel(false);
        let (opened_tx, opened_rx) = oneshot::channel();

        let thread_enabled = enabled.clone();
        let thread_stop = stop.clone();
        let thread_latest = latest.clone();

        std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                capture_thread(
                    thread_enabled,
                    thread_stop,
                    thread_latest,
                    frame_tx,
                    ended_tx,
                    opened_tx,
                );
            })
            .map_err(|e| SessionError::Unknown(format!("capture thread spawn: {e}")))?;

        let sample_rate = opened_rx
            .await
            .map_err(|_| SessionError::Unknown("capture thread exited early".into()))??;

        info!(sample_rate, "microphone capture started");
        Ok(Arc::new(Self {
            sample_rate,
            enabled,
            stop,
            latest,
            frames: tokio::sync::Mutex::new(frame_rx),
            ended_rx,
        }))
    }
}

#[async_trait]
impl AudioInput for CpalAudioInput {
    fn track_count(&self) -> usize {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn next_frame(&self) -> Option<AudioFrame> {
        self.frames.lock().await.recv().await
    }

    fn latest_frame(&self) -> Option<AudioFrame> {
        self.latest.lock().clone()
    }

    fn watch_ended(&self) -> watch::Receiver<bool> {
        self.ended_rx.clone()
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Pick an f32 input config at an opus-compatible sample rate.
fn select_input_config(
    device: &cpal::Device,
) -> Result<(StreamConfig, SampleFormat), SessionError> {
    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| classify_config_error(&e.to_string()))?
        .collect();

    for rate in OPUS_RATES {
        for range in &supported {
            if range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0 {
                let config = range
                    .clone()
                    .with_sample_rate(cpal::SampleRate(rate));
                let format = config.sample_format();
                if matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16) {
                    return Ok((config.config(), format));
                }
            }
        }
    }

    Err(SessionError::ConstraintsUnsatisfiable(
        "no input config at an opus-compatible sample rate".into(),
    ))
}

fn classify_config_error(message: &str) -> SessionError {
    if message.to_ascii_lowercase().contains("permission") {
        SessionError::PermissionDenied
    } else {
        SessionError::Unknown(format!("input config query: {message}"))
    }
}

fn classify_build_error(err: BuildStreamError) -> SessionError {
    match err {
        BuildStreamError::StreamConfigNotSupported => {
            SessionError::ConstraintsUnsatisfiable("stream config not supported".into())
        }
        BuildStreamError::DeviceNotAvailable => SessionError::DeviceBusy,
        BuildStreamError::BackendSpecific { err }
            if err.description.to_ascii_lowercase().contains("permission") =>
        {
            SessionError::PermissionDenied
        }
        other => SessionError::Unknown(format!("input stream build: {other}")),
    }
}

/// Owns the cpal stream for its whole lifetime. Reports the open
/// outcome once through `opened_tx`, then polls the stop flag.
fn capture_thread(
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<AudioFrame>>>,
    frame_tx: mpsc::Sender<AudioFrame>,
    ended_tx: watch::Sender<bool>,
    opened_tx: oneshot::Sender<Result<u32, SessionError>>,
) {
    let device = match cpal::default_host().default_input_device() {
        Some(device) => device,
        None => {
            let _ = opened_tx.send(Err(SessionError::DeviceUnavailable));
            return;
        }
    };

    let (config, format) = match select_input_config(&device) {
        Ok(picked) => picked,
        Err(e) => {
            let _ = opened_tx.send(Err(e));
            return;
        }
    };

    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    let frame_len = (sample_rate * FRAME_MS / 1000) as usize;

    let assembler = Arc::new(Mutex::new(FrameAssembler::new(frame_len)));
    let err_ended = ended_tx.clone();
    let err_fn = move |err: cpal::StreamError| {
        error!(error = %err, "input stream error");
        let _ = err_ended.send(true);
    };

    let on_samples = {
        let assembler = assembler.clone();
        let enabled = enabled.clone();
        let latest = latest.clone();
        let frame_tx = frame_tx.clone();
        move |mono: Vec<f32>| {
            let mut assembler = assembler.lock();
            assembler.push(&mono);
            while let Some(mut samples) = assembler.take_frame() {
                if !enabled.load(Ordering::SeqCst) {
                    samples.iter_mut().for_each(|s| *s = 0.0);
                }
                let frame = AudioFrame::new(samples, sample_rate, now_ms());
                *latest.lock() = Some(frame.clone());
                // Drop frames rather than block the audio callback.
                if frame_tx.try_send(frame).is_err() && frame_tx.is_closed() {
                    return;
                }
            }
        }
    };

    let stream = match format {
        SampleFormat::F32 => {
            let on_samples = on_samples.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    on_samples(downmix_to_mono(data, channels));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let on_samples = on_samples.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    on_samples(downmix_to_mono(&floats, channels));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let on_samples = on_samples.clone();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32_768.0) / 32_768.0)
                        .collect();
                    on_samples(downmix_to_mono(&floats, channels));
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = opened_tx.send(Err(SessionError::ConstraintsUnsatisfiable(format!(
                "unsupported sample format: {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = opened_tx.send(Err(classify_build_error(e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = opened_tx.send(Err(SessionError::Unknown(format!("stream start: {e}"))));
        return;
    }

    if opened_tx.send(Ok(sample_rate)).is_err() {
        // The open was abandoned, so nothing holds the stop flag.
        debug!("capture opened after caller gave up, releasing device");
        drop(stream);
        let _ = ended_tx.send(true);
        return;
    }

    wait_for_shutdown(&stop, &frame_tx);

    drop(stream);
    let _ = ended_tx.send(true);
    debug!("microphone capture stopped");
}

/// Block until stop is requested or every frame consumer is gone.
fn wait_for_shutdown(stop: &AtomicBool, frame_tx: &mpsc::Sender<AudioFrame>) {
    while !stop.load(Ordering::SeqCst) && !frame_tx.is_closed() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Accumulates callback chunks into fixed-length frames.
struct FrameAssembler {
    frame_len: usize,
    buffer: Vec<f32>,
}

impl FrameAssembler {
    fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            buffer: Vec::with_capacity(frame_len * 2),
        }
    }

    fn push(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
        if self.buffer.len() > self.frame_len * 64 {
            // Consumer stalled; keep the newest audio only.
            warn!("capture buffer overflow, dropping stale samples");
            let drop_len = self.buffer.len() - self.frame_len;
            self.buffer.drain(..drop_len);
        }
    }

    fn take_frame(&mut self) -> Option<Vec<f32>> {
        if self.buffer.len() < self.frame_len {
            return None;
        }
        Some(self.buffer.drain(..self.frame_len).collect())
    }
}
