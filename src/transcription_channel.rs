//! Duplex message channel to the remote transcription/response service
//!
//! Carries raw audio frames and JSON control messages outbound, and
//! streaming transcription/response events inbound. The remote service is
//! an external collaborator: the channel ships as a connected in-process
//! pair, with the transport end owned by whatever adapter speaks to the
//! real service (or by a test harness).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::composer::ResponseMetadata;
use crate::error::AssistantError;

/// Control message sent to the service as a JSON text frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    TextInput { text: String },
}

/// Outbound traffic: binary audio or JSON control
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Audio(Vec<u8>),
    Control(ControlMessage),
}

/// Inbound events from the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    TranscriptionPartial { text: String, confidence: f32 },
    TranscriptionComplete { text: String },
    TextResponse { content: String, metadata: ResponseMetadata },
    Error { message: String },
}

/// Local end of the duplex channel, held by the voice controller
pub struct TranscriptionChannel {
    outbound_tx: mpsc::Sender<OutboundFrame>,
    inbound_rx: mpsc::Receiver<ChannelEvent>,
    open: Arc<AtomicBool>,
}

/// Remote end of the duplex channel, held by the transport adapter
pub struct ChannelTransport {
    outbound_rx: mpsc::Receiver<OutboundFrame>,
    inbound_tx: mpsc::Sender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

impl TranscriptionChannel {
    /// Build a connected channel/transport pair
    pub fn pair(pending_frames: usize) -> (TranscriptionChannel, ChannelTransport) {
        let (outbound_tx, outbound_rx) = mpsc::channel(pending_frames);
        let (inbound_tx, inbound_rx) = mpsc::channel(pending_frames);
        let open = Arc::new(AtomicBool::new(true));

        (
            TranscriptionChannel {
                outbound_tx,
                inbound_rx,
                open: open.clone(),
            },
            ChannelTransport {
                outbound_rx,
                inbound_tx,
                open,
            },
        )
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Clone of the outbound sender for the audio pump task
    pub(crate) fn outbound_sender(&self) -> mpsc::Sender<OutboundFrame> {
        self.outbound_tx.clone()
    }

    pub async fn send_audio(&self, frame: Vec<u8>) -> Result<(), AssistantError> {
        self.send(OutboundFrame::Audio(frame)).await
    }

    pub async fn send_text_input(&self, text: &str) -> Result<(), AssistantError> {
        self.send(OutboundFrame::Control(ControlMessage::TextInput {
            text: text.to_string(),
        }))
        .await
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), AssistantError> {
        if !self.is_open() {
            return Err(AssistantError::ChannelClosed);
        }
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| AssistantError::ChannelClosed)
    }

    /// Next inbound event; `None` once the transport has closed and the
    /// buffer is drained
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound_rx.recv().await
    }
}

impl ChannelTransport {
    pub async fn next_outbound(&mut self) -> Option<OutboundFrame> {
        self.outbound_rx.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<OutboundFrame> {
        self.outbound_rx.try_recv().ok()
    }

    /// Deliver a service event to the local end
    pub async fn emit(&self, event: ChannelEvent) -> Result<(), AssistantError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(AssistantError::ChannelClosed);
        }
        self.inbound_tx
            .send(event)
            .await
            .map_err(|_| AssistantError::ChannelClosed)
    }

    /// Close the channel; pending sends on either side fail from here on
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Encode a control message as it appears on the wire
pub fn encode_control(message: &ControlMessage) -> String {
    serde_json::to_string(message).expect("control messages always serialize")
}

/// Decode a service event from its wire form
pub fn decode_event(raw: &str) -> Result<ChannelEvent, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_input_matches_wire_protocol() {
        let wire = encode_control(&ControlMessage::TextInput {
            text: "what's the weather".to_string(),
        });
        assert_eq!(wire, r#"{"type":"text_input","text":"what's the weather"}"#);
    }

    #[test]
    fn inbound_events_decode_from_wire_form() {
        let partial = decode_event(r#"{"type":"transcription_partial","text":"hel","confidence":0.5}"#)
            .unwrap();
        assert_eq!(
            partial,
            ChannelEvent::TranscriptionPartial {
                text: "hel".to_string(),
                confidence: 0.5,
            }
        );

        let complete =
            decode_event(r#"{"type":"transcription_complete","text":"hello"}"#).unwrap();
        assert_eq!(
            complete,
            ChannelEvent::TranscriptionComplete {
                text: "hello".to_string(),
            }
        );

        let error = decode_event(r#"{"type":"error","message":"asr backend down"}"#).unwrap();
        assert_eq!(
            error,
            ChannelEvent::Error {
                message: "asr backend down".to_string(),
            }
        );

        assert!(decode_event(r#"{"type":"tts_chunk"}"#).is_err());
    }

    #[tokio::test]
    async fn frames_and_events_cross_the_pair() {
        let (mut channel, mut transport) = TranscriptionChannel::pair(8);

        channel.send_audio(vec![1, 2, 3]).await.unwrap();
        channel.send_text_input("hello").await.unwrap();

        assert_eq!(
            transport.next_outbound().await,
            Some(OutboundFrame::Audio(vec![1, 2, 3]))
        );
        assert_eq!(
            transport.next_outbound().await,
            Some(OutboundFrame::Control(ControlMessage::TextInput {
                text: "hello".to_string(),
            }))
        );

        transport
            .emit(ChannelEvent::TranscriptionPartial {
                text: "he".to_string(),
                confidence: 0.5,
            })
            .await
            .unwrap();
        assert!(matches!(
            channel.recv().await,
            Some(ChannelEvent::TranscriptionPartial { .. })
        ));
    }

    #[tokio::test]
    async fn sends_fail_after_close() {
        let (channel, transport) = TranscriptionChannel::pair(8);

        transport.close();
        let err = channel.send_audio(vec![0]).await.unwrap_err();
        assert_eq!(err, AssistantError::ChannelClosed);

        let err = transport
            .emit(ChannelEvent::Error {
                message: "late".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, AssistantError::ChannelClosed);
    }

    #[tokio::test]
    async fn dropping_transport_closes_the_channel() {
        let (channel, transport) = TranscriptionChannel::pair(8);
        drop(transport);

        assert!(!channel.is_open());
        assert_eq!(
            channel.send_audio(vec![9]).await.unwrap_err(),
            AssistantError::ChannelClosed
        );
    }
}
