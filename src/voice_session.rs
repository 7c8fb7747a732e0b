//! Voice capture state machine
//!
//! One recording attempt is a `VoiceSession`: microphone acquisition,
//! capture, live partial transcripts, and a final transcript handed to the
//! text pipeline on submit. All transitions go through a single pure
//! reducer so the whole table is testable without an audio device; the
//! controller applies the reducer's effects to the real resources.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::audio_capture::{frame_to_bytes, frame_volume, CaptureBackend, MicHandle, Microphone};
use crate::config::VoiceConfig;
use crate::error::AssistantError;
use crate::transcription_channel::{ChannelEvent, TranscriptionChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Recording,
    Paused,
    Processing,
    ReadyToSubmit,
    Error,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Recording => "recording",
            VoiceState::Paused => "paused",
            VoiceState::Processing => "processing",
            VoiceState::ReadyToSubmit => "ready-to-submit",
            VoiceState::Error => "error",
        }
    }
}

/// Inputs to the reducer: user actions, capture outcomes, timer ticks and
/// channel traffic
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Start,
    MicFailed(String),
    Pause,
    Resume,
    Stop,
    Partial { text: String, confidence: f32 },
    Final { text: String },
    Tick,
    Submit,
    Cancel,
    ChannelError(String),
}

impl VoiceEvent {
    fn name(&self) -> &'static str {
        match self {
            VoiceEvent::Start => "start",
            VoiceEvent::MicFailed(_) => "mic-failed",
            VoiceEvent::Pause => "pause",
            VoiceEvent::Resume => "resume",
            VoiceEvent::Stop => "stop",
            VoiceEvent::Partial { .. } => "partial",
            VoiceEvent::Final { .. } => "final",
            VoiceEvent::Tick => "tick",
            VoiceEvent::Submit => "submit",
            VoiceEvent::Cancel => "cancel",
            VoiceEvent::ChannelError(_) => "channel-error",
        }
    }
}

/// Side effects the controller must perform after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PauseCapture,
    ResumeCapture,
    StopCapture,
    StartTimer,
    PauseTimer,
    ClearTimer,
    ReleaseMic,
    EmitMessage(String),
    SurfaceError(AssistantError),
}

/// State of one recording attempt
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSession {
    pub state: VoiceState,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: u32,
    pub partial_text: String,
    pub final_text: String,
    pub volume: f32,
    pub error: Option<String>,
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self {
            state: VoiceState::Idle,
            started_at: None,
            duration_secs: 0,
            partial_text: String::new(),
            final_text: String::new(),
            volume: 0.0,
            error: None,
        }
    }
}

impl VoiceSession {
    fn reset(&mut self) {
        *self = VoiceSession::default();
    }
}

/// Apply one event to the session
///
/// Capture is already running when `Start` is dispatched (acquisition
/// failures arrive as `MicFailed` instead, so the machine never enters
/// `recording` without the device). Events that the current state cannot
/// accept leave the session unchanged.
pub fn reduce(mut session: VoiceSession, event: VoiceEvent) -> (VoiceSession, Vec<Effect>) {
    use VoiceState::*;

    let mut effects = Vec::new();
    match (session.state, event) {
        (Idle, VoiceEvent::Start) => {
            session.reset();
            session.state = Recording;
            session.started_at = Some(Utc::now());
            effects.push(Effect::StartTimer);
        }
        (_, VoiceEvent::MicFailed(reason)) => {
            session.state = Error;
            session.error = Some(reason.clone());
            effects.push(Effect::StopCapture);
            effects.push(Effect::ClearTimer);
            effects.push(Effect::ReleaseMic);
            effects.push(Effect::SurfaceError(AssistantError::MicrophoneUnavailable(
                reason,
            )));
        }
        (Recording, VoiceEvent::Pause) => {
            session.state = Paused;
            effects.push(Effect::PauseCapture);
            effects.push(Effect::PauseTimer);
        }
        (Paused, VoiceEvent::Resume) => {
            session.state = Recording;
            effects.push(Effect::ResumeCapture);
            effects.push(Effect::StartTimer);
        }
        (Recording | Paused, VoiceEvent::Stop) => {
            session.state = Processing;
            session.volume = 0.0;
            effects.push(Effect::StopCapture);
            effects.push(Effect::ClearTimer);
            effects.push(Effect::ReleaseMic);
        }
        (Processing, VoiceEvent::Final { text }) => {
            if text.trim().is_empty() {
                session.state = Error;
                session.error = Some(AssistantError::NoSpeechDetected.to_string());
                effects.push(Effect::ReleaseMic);
                effects.push(Effect::SurfaceError(AssistantError::NoSpeechDetected));
            } else {
                session.state = ReadyToSubmit;
                session.final_text = text;
            }
        }
        (Recording | Paused, VoiceEvent::Partial { text, .. }) => {
            // The visible transcript never shrinks mid-recording; a shorter
            // partial is a recognizer regression and is ignored
            if text.chars().count() >= session.partial_text.chars().count() {
                session.partial_text = text;
            }
        }
        (Recording, VoiceEvent::Tick) => {
            session.duration_secs += 1;
        }
        (ReadyToSubmit, VoiceEvent::Submit) => {
            effects.push(Effect::EmitMessage(session.final_text.clone()));
            effects.push(Effect::ClearTimer);
            effects.push(Effect::ReleaseMic);
            session.reset();
        }
        (_, VoiceEvent::Cancel) => {
            session.reset();
            effects.push(Effect::StopCapture);
            effects.push(Effect::ClearTimer);
            effects.push(Effect::ReleaseMic);
        }
        (_, VoiceEvent::ChannelError(message)) => {
            session.state = Error;
            session.error = Some(message);
            effects.push(Effect::StopCapture);
            effects.push(Effect::ClearTimer);
            effects.push(Effect::ReleaseMic);
            effects.push(Effect::SurfaceError(AssistantError::ChannelClosed));
        }
        (_, _) => {}
    }

    (session, effects)
}

/// Drives a [`VoiceSession`] against the real resources: microphone guard,
/// capture backend, duration timer and transcription channel
pub struct VoiceController {
    session: Arc<Mutex<VoiceSession>>,
    microphone: Microphone,
    mic_handle: Option<MicHandle>,
    capture: Box<dyn CaptureBackend>,
    channel: TranscriptionChannel,
    submit_tx: mpsc::UnboundedSender<String>,
    max_recording_secs: u32,
    timer: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl VoiceController {
    pub fn new(
        microphone: Microphone,
        capture: Box<dyn CaptureBackend>,
        channel: TranscriptionChannel,
        config: &VoiceConfig,
        submit_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(VoiceSession::default())),
            microphone,
            mic_handle: None,
            capture,
            channel,
            submit_tx,
            max_recording_secs: config.max_recording_secs,
            timer: None,
            pump: None,
        }
    }

    pub fn session(&self) -> VoiceSession {
        self.session.lock().clone()
    }

    pub fn state(&self) -> VoiceState {
        self.session.lock().state
    }

    /// Acquire the microphone and begin recording
    ///
    /// Fails fast when the device is held by another session; the machine
    /// lands in `Error` without ever entering `Recording`.
    pub fn start(&mut self) -> Result<(), AssistantError> {
        self.expect_state(VoiceState::Idle, "start")?;

        let handle = match self.microphone.try_acquire() {
            Ok(handle) => handle,
            Err(e) => {
                self.dispatch(VoiceEvent::MicFailed(e.to_string()));
                return Err(e);
            }
        };
        self.mic_handle = Some(handle);

        let (frames_tx, frames_rx) = mpsc::channel(64);
        if let Err(e) = self.capture.start(frames_tx) {
            self.dispatch(VoiceEvent::MicFailed(e.to_string()));
            return Err(e);
        }

        self.spawn_pump(frames_rx);
        self.dispatch(VoiceEvent::Start);
        Ok(())
    }

    /// Stop delivering audio, keeping the accumulated transcript
    pub fn pause(&mut self) -> Result<(), AssistantError> {
        self.expect_state(VoiceState::Recording, "pause")?;
        self.dispatch(VoiceEvent::Pause);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), AssistantError> {
        self.expect_state(VoiceState::Paused, "resume")?;
        self.dispatch(VoiceEvent::Resume);
        Ok(())
    }

    /// End capture and wait for the final transcript
    ///
    /// The machine sits in `Processing` until the service's completed
    /// transcript arrives (or [`finalize`](Self::finalize) is called).
    pub fn stop(&mut self) -> Result<(), AssistantError> {
        let state = self.state();
        if state != VoiceState::Recording && state != VoiceState::Paused {
            return Err(AssistantError::InvalidTransition {
                state: state.as_str().to_string(),
                event: "stop".to_string(),
            });
        }
        self.dispatch(VoiceEvent::Stop);
        Ok(())
    }

    /// Resolve `Processing` with the given transcript
    pub fn finalize(&mut self, text: &str) -> Result<(), AssistantError> {
        self.expect_state(VoiceState::Processing, "final")?;
        self.dispatch(VoiceEvent::Final {
            text: text.to_string(),
        });
        Ok(())
    }

    /// Stop and finalize from the accumulated partial transcript, for
    /// hosts that do not wait on a completed-transcript event
    pub fn stop_and_finalize(&mut self) -> Result<(), AssistantError> {
        self.stop()?;
        let accumulated = self.session.lock().partial_text.clone();
        self.finalize(&accumulated)
    }

    /// Emit the final transcript as a user message and return to idle
    pub fn submit(&mut self) -> Result<(), AssistantError> {
        self.expect_state(VoiceState::ReadyToSubmit, "submit")?;
        self.dispatch(VoiceEvent::Submit);
        Ok(())
    }

    /// Discard the session from any state, releasing every resource
    pub fn cancel(&mut self) {
        self.dispatch(VoiceEvent::Cancel);
    }

    /// Feed one inbound channel event into the machine
    pub fn handle_channel_event(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::TranscriptionPartial { text, confidence } => {
                self.dispatch(VoiceEvent::Partial {
                    text: text.clone(),
                    confidence: *confidence,
                });
            }
            ChannelEvent::TranscriptionComplete { text } => {
                if self.state() == VoiceState::Processing {
                    self.dispatch(VoiceEvent::Final { text: text.clone() });
                } else {
                    self.dispatch(VoiceEvent::Partial {
                        text: text.clone(),
                        confidence: 1.0,
                    });
                }
            }
            ChannelEvent::Error { message } => {
                self.dispatch(VoiceEvent::ChannelError(message.clone()));
            }
            ChannelEvent::TextResponse { .. } => {
                // Rendered by the conversation host, not the capture machine
            }
        }
    }

    /// Await the next inbound event, applying it before returning it
    ///
    /// Returns `None` when the transport closed; the session is already in
    /// `Error` by then.
    pub async fn next_channel_event(&mut self) -> Option<ChannelEvent> {
        match self.channel.recv().await {
            Some(event) => {
                self.handle_channel_event(&event);
                Some(event)
            }
            None => {
                self.dispatch(VoiceEvent::ChannelError(
                    "transcription channel closed".to_string(),
                ));
                None
            }
        }
    }

    fn expect_state(&self, expected: VoiceState, event: &str) -> Result<(), AssistantError> {
        let state = self.state();
        if state != expected {
            return Err(AssistantError::InvalidTransition {
                state: state.as_str().to_string(),
                event: event.to_string(),
            });
        }
        Ok(())
    }

    fn dispatch(&mut self, event: VoiceEvent) {
        log::debug!("Voice event: {}", event.name());
        let effects = {
            let mut session = self.session.lock();
            let (next, effects) = reduce(session.clone(), event);
            *session = next;
            effects
        };
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::PauseCapture => self.capture.pause(),
            Effect::ResumeCapture => self.capture.resume(),
            Effect::StopCapture => {
                self.capture.stop();
                if let Some(pump) = self.pump.take() {
                    pump.abort();
                }
            }
            Effect::StartTimer => self.spawn_timer(),
            Effect::PauseTimer => {
                // The timer task gates on state, so pausing needs no action
            }
            Effect::ClearTimer => {
                if let Some(timer) = self.timer.take() {
                    timer.abort();
                }
            }
            Effect::ReleaseMic => {
                self.mic_handle.take();
            }
            Effect::EmitMessage(text) => {
                if self.submit_tx.send(text).is_err() {
                    log::warn!("Voice submit receiver dropped; transcript lost");
                }
            }
            Effect::SurfaceError(e) => {
                log::warn!("Voice session error: {}", e);
            }
        }
    }

    fn spawn_timer(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let session = self.session.clone();
        let max_secs = self.max_recording_secs;
        self.timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let mut guard = session.lock();
                match guard.state {
                    VoiceState::Recording => {
                        let (next, _) = reduce(guard.clone(), VoiceEvent::Tick);
                        *guard = next;
                        if guard.duration_secs == max_secs {
                            log::warn!("Recording reached the {}s limit", max_secs);
                        }
                    }
                    VoiceState::Paused => {}
                    _ => break,
                }
            }
        }));
    }

    fn spawn_pump(&mut self, mut frames_rx: mpsc::Receiver<Vec<f32>>) {
        let session = self.session.clone();
        let outbound = self.channel.outbound_sender();
        self.pump = Some(tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                {
                    let mut guard = session.lock();
                    if guard.state != VoiceState::Recording {
                        continue;
                    }
                    guard.volume = frame_volume(&frame);
                }
                if outbound
                    .send(crate::transcription_channel::OutboundFrame::Audio(
                        frame_to_bytes(&frame),
                    ))
                    .await
                    .is_err()
                {
                    log::warn!("Audio frame dropped: transcription channel gone");
                    break;
                }
            }
        }));
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.capture.stop();
        self.mic_handle.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription_channel::{ChannelTransport, OutboundFrame};
    use parking_lot::Mutex as PlMutex;

    fn recording_session() -> VoiceSession {
        let (session, _) = reduce(VoiceSession::default(), VoiceEvent::Start);
        session
    }

    #[test]
    fn start_enters_recording_with_fresh_state() {
        let session = recording_session();
        assert_eq!(session.state, VoiceState::Recording);
        assert_eq!(session.duration_secs, 0);
        assert!(session.partial_text.is_empty());
        assert!(session.started_at.is_some());
    }

    #[test]
    fn mic_failure_lands_in_error_not_recording() {
        let (session, effects) = reduce(
            VoiceSession::default(),
            VoiceEvent::MicFailed("permission denied".to_string()),
        );
        assert_eq!(session.state, VoiceState::Error);
        assert!(effects.contains(&Effect::ReleaseMic));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SurfaceError(AssistantError::MicrophoneUnavailable(_)))));
    }

    #[test]
    fn pause_and_resume_preserve_transcript_and_duration() {
        let mut session = recording_session();
        (session, _) = reduce(
            session,
            VoiceEvent::Partial {
                text: "hello re".to_string(),
                confidence: 0.8,
            },
        );
        (session, _) = reduce(session, VoiceEvent::Tick);

        let (paused, effects) = reduce(session, VoiceEvent::Pause);
        assert_eq!(paused.state, VoiceState::Paused);
        assert_eq!(paused.partial_text, "hello re");
        assert_eq!(paused.duration_secs, 1);
        assert!(effects.contains(&Effect::PauseCapture));

        // Ticks do not advance the clock while paused
        let (still_paused, _) = reduce(paused, VoiceEvent::Tick);
        assert_eq!(still_paused.duration_secs, 1);

        let (resumed, effects) = reduce(still_paused, VoiceEvent::Resume);
        assert_eq!(resumed.state, VoiceState::Recording);
        assert!(effects.contains(&Effect::ResumeCapture));
    }

    #[test]
    fn transcript_is_monotonic_while_recording() {
        let mut session = recording_session();
        (session, _) = reduce(
            session,
            VoiceEvent::Partial {
                text: "hello world".to_string(),
                confidence: 0.9,
            },
        );
        // A shorter partial is a recognizer regression and must not shrink
        // the visible transcript
        (session, _) = reduce(
            session,
            VoiceEvent::Partial {
                text: "hello".to_string(),
                confidence: 0.4,
            },
        );
        assert_eq!(session.partial_text, "hello world");
    }

    #[test]
    fn stop_with_empty_transcript_errors() {
        let session = recording_session();
        let (session, effects) = reduce(session, VoiceEvent::Stop);
        assert_eq!(session.state, VoiceState::Processing);
        assert!(effects.contains(&Effect::ReleaseMic));

        let (session, effects) = reduce(
            session,
            VoiceEvent::Final {
                text: "   ".to_string(),
            },
        );
        assert_eq!(session.state, VoiceState::Error);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SurfaceError(AssistantError::NoSpeechDetected))));
    }

    #[test]
    fn stop_with_transcript_reaches_ready_then_submit_emits_once() {
        let mut session = recording_session();
        (session, _) = reduce(
            session,
            VoiceEvent::Partial {
                text: "hello".to_string(),
                confidence: 0.9,
            },
        );
        (session, _) = reduce(session, VoiceEvent::Stop);
        (session, _) = reduce(
            session,
            VoiceEvent::Final {
                text: "hello".to_string(),
            },
        );
        assert_eq!(session.state, VoiceState::ReadyToSubmit);
        assert_eq!(session.final_text, "hello");

        let (session, effects) = reduce(session, VoiceEvent::Submit);
        assert_eq!(session.state, VoiceState::Idle);
        let emitted: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::EmitMessage(text) => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(emitted, vec!["hello".to_string()]);
    }

    #[test]
    fn cancel_resets_from_every_state() {
        let states = [
            recording_session(),
            {
                let (s, _) = reduce(recording_session(), VoiceEvent::Pause);
                s
            },
            {
                let (s, _) = reduce(recording_session(), VoiceEvent::Stop);
                s
            },
            {
                let (s, _) = reduce(
                    VoiceSession::default(),
                    VoiceEvent::MicFailed("x".to_string()),
                );
                s
            },
        ];

        for session in states {
            let (cancelled, effects) = reduce(session, VoiceEvent::Cancel);
            assert_eq!(cancelled, VoiceSession::default());
            assert!(effects.contains(&Effect::ReleaseMic));
            assert!(effects.contains(&Effect::ClearTimer));
        }
    }

    #[test]
    fn channel_error_is_terminal_for_the_session() {
        let (session, effects) = reduce(
            recording_session(),
            VoiceEvent::ChannelError("socket dropped".to_string()),
        );
        assert_eq!(session.state, VoiceState::Error);
        assert!(effects.contains(&Effect::ReleaseMic));
    }

    #[test]
    fn unexpected_events_leave_state_untouched() {
        let idle = VoiceSession::default();
        let (after, effects) = reduce(idle.clone(), VoiceEvent::Pause);
        assert_eq!(after, idle);
        assert!(effects.is_empty());

        let (after, effects) = reduce(idle.clone(), VoiceEvent::Submit);
        assert_eq!(after, idle);
        assert!(effects.is_empty());
    }

    /// Capture backend that records calls and exposes the frame sender
    struct FakeCapture {
        frames_tx: Arc<PlMutex<Option<mpsc::Sender<Vec<f32>>>>>,
        fail_start: bool,
    }

    impl FakeCapture {
        fn new() -> (Self, Arc<PlMutex<Option<mpsc::Sender<Vec<f32>>>>>) {
            let shared = Arc::new(PlMutex::new(None));
            (
                Self {
                    frames_tx: shared.clone(),
                    fail_start: false,
                },
                shared,
            )
        }

        fn failing() -> Self {
            Self {
                frames_tx: Arc::new(PlMutex::new(None)),
                fail_start: true,
            }
        }
    }

    impl CaptureBackend for FakeCapture {
        fn start(&mut self, frames_tx: mpsc::Sender<Vec<f32>>) -> Result<(), AssistantError> {
            if self.fail_start {
                return Err(AssistantError::MicrophoneUnavailable(
                    "no input device".to_string(),
                ));
            }
            *self.frames_tx.lock() = Some(frames_tx);
            Ok(())
        }

        fn pause(&mut self) {}
        fn resume(&mut self) {}

        fn stop(&mut self) {
            self.frames_tx.lock().take();
        }
    }

    struct Harness {
        controller: VoiceController,
        microphone: Microphone,
        transport: ChannelTransport,
        submit_rx: mpsc::UnboundedReceiver<String>,
        frames: Arc<PlMutex<Option<mpsc::Sender<Vec<f32>>>>>,
    }

    fn harness() -> Harness {
        let microphone = Microphone::new();
        let (capture, frames) = FakeCapture::new();
        let (channel, transport) = TranscriptionChannel::pair(64);
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let controller = VoiceController::new(
            microphone.clone(),
            Box::new(capture),
            channel,
            &VoiceConfig::default(),
            submit_tx,
        );
        Harness {
            controller,
            microphone,
            transport,
            submit_rx,
            frames,
        }
    }

    #[tokio::test]
    async fn empty_stop_sequence_ends_in_error_with_mic_released() {
        let mut h = harness();
        h.controller.start().unwrap();
        assert_eq!(h.controller.state(), VoiceState::Recording);
        assert_eq!(h.microphone.active_acquisitions(), 1);

        h.controller.stop_and_finalize().unwrap();
        assert_eq!(h.controller.state(), VoiceState::Error);
        assert_eq!(h.microphone.active_acquisitions(), 0);
    }

    #[tokio::test]
    async fn spoken_hello_submits_exactly_one_user_message() {
        let mut h = harness();
        h.controller.start().unwrap();

        h.transport
            .emit(ChannelEvent::TranscriptionPartial {
                text: "hello".to_string(),
                confidence: 0.9,
            })
            .await
            .unwrap();
        h.controller.next_channel_event().await.unwrap();

        h.controller.stop_and_finalize().unwrap();
        assert_eq!(h.controller.state(), VoiceState::ReadyToSubmit);

        h.controller.submit().unwrap();
        assert_eq!(h.controller.state(), VoiceState::Idle);
        assert_eq!(h.microphone.active_acquisitions(), 0);

        assert_eq!(h.submit_rx.recv().await, Some("hello".to_string()));
        assert!(h.submit_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_session_fails_fast_while_mic_is_held() {
        let mut first = harness();
        first.controller.start().unwrap();

        let (capture, _) = FakeCapture::new();
        let (channel, _transport) = TranscriptionChannel::pair(8);
        let (submit_tx, _submit_rx) = mpsc::unbounded_channel();
        let mut second = VoiceController::new(
            first.microphone.clone(),
            Box::new(capture),
            channel,
            &VoiceConfig::default(),
            submit_tx,
        );

        let err = second.start().unwrap_err();
        assert!(matches!(err, AssistantError::MicrophoneUnavailable(_)));
        assert_eq!(second.state(), VoiceState::Error);

        // The holder is unaffected, and its cancel frees the device
        assert_eq!(first.controller.state(), VoiceState::Recording);
        first.controller.cancel();
        assert_eq!(first.microphone.active_acquisitions(), 0);
    }

    #[tokio::test]
    async fn capture_start_failure_releases_the_mic() {
        let microphone = Microphone::new();
        let (channel, _transport) = TranscriptionChannel::pair(8);
        let (submit_tx, _submit_rx) = mpsc::unbounded_channel();
        let mut controller = VoiceController::new(
            microphone.clone(),
            Box::new(FakeCapture::failing()),
            channel,
            &VoiceConfig::default(),
            submit_tx,
        );

        assert!(controller.start().is_err());
        assert_eq!(controller.state(), VoiceState::Error);
        assert_eq!(microphone.active_acquisitions(), 0);
    }

    #[tokio::test]
    async fn frames_reach_the_transport_as_audio_bytes() {
        let mut h = harness();
        h.controller.start().unwrap();

        let frames_tx = h.frames.lock().clone().unwrap();
        frames_tx.send(vec![0.5, -0.5]).await.unwrap();

        match h.transport.next_outbound().await {
            Some(OutboundFrame::Audio(bytes)) => {
                assert_eq!(bytes.len(), 8);
                assert_eq!(&bytes[..4], &0.5f32.to_le_bytes());
            }
            other => panic!("expected audio frame, got {:?}", other),
        }
        assert!(h.controller.session().volume > 0.0);
    }

    #[tokio::test]
    async fn transport_error_event_surfaces_as_error_state() {
        let mut h = harness();
        h.controller.start().unwrap();

        h.transport
            .emit(ChannelEvent::Error {
                message: "asr backend down".to_string(),
            })
            .await
            .unwrap();
        h.controller.next_channel_event().await.unwrap();

        assert_eq!(h.controller.state(), VoiceState::Error);
        assert_eq!(h.microphone.active_acquisitions(), 0);
    }

    #[tokio::test]
    async fn completed_transcript_resolves_processing() {
        let mut h = harness();
        h.controller.start().unwrap();
        h.controller.stop().unwrap();
        assert_eq!(h.controller.state(), VoiceState::Processing);

        h.transport
            .emit(ChannelEvent::TranscriptionComplete {
                text: "beach parking question".to_string(),
            })
            .await
            .unwrap();
        h.controller.next_channel_event().await.unwrap();

        assert_eq!(h.controller.state(), VoiceState::ReadyToSubmit);
        assert_eq!(h.controller.session().final_text, "beach parking question");
    }

    #[tokio::test]
    async fn submitted_transcript_flows_into_the_text_pipeline() {
        use crate::config::AppConfig;
        use crate::conversation::{ConversationEngine, InputOrigin, MessageKind};
        use crate::live_data::{testing::FakeSource, LiveDataGateway};

        let mut h = harness();
        h.controller.start().unwrap();
        h.transport
            .emit(ChannelEvent::TranscriptionPartial {
                text: "what's the weather".to_string(),
                confidence: 0.9,
            })
            .await
            .unwrap();
        h.controller.next_channel_event().await.unwrap();
        h.controller.stop_and_finalize().unwrap();
        h.controller.submit().unwrap();

        let engine = ConversationEngine::new(
            &AppConfig::default(),
            LiveDataGateway::new(Arc::new(FakeSource::all_ok())),
        );
        let transcript = h.submit_rx.recv().await.unwrap();
        let reply = engine.handle_input(&transcript, InputOrigin::Voice).await;

        assert_eq!(reply.kind, MessageKind::DataInsight);
        assert!(reply.content.contains("Weather: 58°F"));
        assert_eq!(engine.messages()[0].kind, MessageKind::Voice);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_once_per_second_while_recording() {
        let mut h = harness();
        h.controller.start().unwrap();

        tokio::time::advance(Duration::from_millis(3500)).await;
        tokio::task::yield_now().await;
        let ticked = h.controller.session().duration_secs;
        assert!(ticked >= 1, "duration should advance, got {}", ticked);

        h.controller.cancel();
        assert_eq!(h.controller.session().duration_secs, 0);
    }
}
