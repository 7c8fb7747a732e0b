//! Microphone ownership and capture
//!
//! The microphone is a single exclusively-owned resource: acquisition
//! fails fast when another session holds it, and the guard releases on
//! drop so no exit path can leak the device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use crate::config::VoiceConfig;
use crate::error::AssistantError;

/// Registry for the capture device
#[derive(Clone, Default)]
pub struct Microphone {
    held: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Microphone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive ownership, failing fast when already held
    pub fn try_acquire(&self) -> Result<MicHandle, AssistantError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AssistantError::MicrophoneUnavailable(
                "capture device already in use".to_string(),
            ));
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(MicHandle {
            held: self.held.clone(),
            active: self.active.clone(),
        })
    }

    /// Number of live acquisitions (0 or 1)
    pub fn active_acquisitions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Exclusive ownership guard; dropping it releases the device
#[derive(Debug)]
pub struct MicHandle {
    held: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Drop for MicHandle {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.held.store(false, Ordering::Release);
    }
}

/// Seam between the voice controller and the concrete capture stream
///
/// `start` delivers mono f32 frames on the given sender until `stop`;
/// `pause`/`resume` gate delivery without tearing the stream down.
pub trait CaptureBackend: Send {
    fn start(&mut self, frames_tx: mpsc::Sender<Vec<f32>>) -> Result<(), AssistantError>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
}

enum StreamCommand {
    Pause,
    Resume,
    Stop,
}

/// cpal implementation of [`CaptureBackend`]
///
/// The cpal stream is not `Send`, so it lives on a dedicated worker thread
/// and is driven by commands from the controller.
pub struct CpalCapture {
    sample_rate: u32,
    command_tx: Option<std::sync::mpsc::Sender<StreamCommand>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            command_tx: None,
            worker: None,
        }
    }
}

impl CaptureBackend for CpalCapture {
    fn start(&mut self, frames_tx: mpsc::Sender<Vec<f32>>) -> Result<(), AssistantError> {
        if self.worker.is_some() {
            return Err(AssistantError::MicrophoneUnavailable(
                "capture stream already running".to_string(),
            ));
        }

        let (command_tx, command_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let sample_rate = self.sample_rate;

        let worker = thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(AssistantError::MicrophoneUnavailable(
                        "no input device".to_string(),
                    )));
                    return;
                }
            };

            let stream_config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let delivering = Arc::new(AtomicBool::new(true));
            let delivering_for_callback = delivering.clone();

            let stream = match device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !delivering_for_callback.load(Ordering::Relaxed) {
                        return;
                    }
                    if frames_tx.try_send(data.to_vec()).is_err() {
                        log::warn!("Audio frame channel full, dropping samples");
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(AssistantError::MicrophoneUnavailable(
                        e.to_string(),
                    )));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AssistantError::MicrophoneUnavailable(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Hold the stream alive until the controller says stop
            while let Ok(command) = command_rx.recv() {
                match command {
                    StreamCommand::Pause => {
                        delivering.store(false, Ordering::Relaxed);
                        if let Err(e) = stream.pause() {
                            log::warn!("Failed to pause capture stream: {}", e);
                        }
                    }
                    StreamCommand::Resume => {
                        delivering.store(true, Ordering::Relaxed);
                        if let Err(e) = stream.play() {
                            log::warn!("Failed to resume capture stream: {}", e);
                        }
                    }
                    StreamCommand::Stop => break,
                }
            }
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.command_tx = Some(command_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(AssistantError::MicrophoneUnavailable(
                "capture stream did not start".to_string(),
            )),
        }
    }

    fn pause(&mut self) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(StreamCommand::Pause);
        }
    }

    fn resume(&mut self) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(StreamCommand::Resume);
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(StreamCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RMS level of a frame, scaled to 0..=100 for the UI volume meter
pub fn frame_volume(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let mean_square: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
    (mean_square.sqrt() * 100.0).min(100.0)
}

/// Encode f32 samples as little-endian bytes for the audio wire
pub fn frame_to_bytes(frame: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 4);
    for sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
