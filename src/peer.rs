//! Peer connection controller.
//!
//! Owns exactly one peer link and one local/remote media stream pair
//! for the lifetime of one call attempt, drives the offer/answer
//! exchange over the signaling transport, and reports everything it
//! observes as a single typed [`PeerEvent`] stream.
//!
//! Failure policy: any asynchronous step that fails is preceded by the
//! controller's own internal teardown, and surfaces either as the `Err`
//! of the operation that was in flight or as exactly one terminal
//! [`PeerEvent`]. `end_call` is idempotent and safe on a controller
//! that never completed negotiation, so the manager can always call it
//! defensively.

use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::CallError;
use crate::link::{IceState, LinkConnectionState, LinkEvent, PeerLink, PeerLinkFactory};
use crate::media::{MediaCapture, MediaOptions, MediaStream, TrackKind};
use crate::signaling::{
    AnswerPayload, CallRef, IceCandidate, OfferPayload, SessionDescription, Signal,
    SignalingTransport,
};
use crate::types::{CallId, CallMediaType, ChatId};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Everything the controller reports to the manager.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Remote media started flowing.
    RemoteStream(MediaStream),
    /// Raw transport state pair, for the quality monitor.
    ConnectionState {
        connection: LinkConnectionState,
        ice: IceState,
    },
    /// No remote answer or stream arrived within the bound.
    NoAnswer,
    /// The remote side is busy.
    Busy,
    /// The remote side hung up (observed at the media layer).
    CallEnd,
    /// The peer transport could not establish or keep media flowing.
    ConnectionFailed(String),
    /// A signaling or negotiation step failed after setup returned.
    Error(String),
}

pub struct PeerConnectionController {
    call_id: CallId,
    chat_id: ChatId,
    transport: Arc<dyn SignalingTransport>,
    link: Arc<dyn PeerLink>,
    events: mpsc::Sender<PeerEvent>,
    no_answer_timeout: Duration,
    local_stream: Mutex<Option<MediaStream>>,
    remote_stream: Mutex<Option<MediaStream>>,
    /// Set once, by whichever path tears the controller down first.
    closed: AtomicBool,
    /// A remote answer or stream arrived; the no-answer timer is moot.
    answered: AtomicBool,
    /// An offer or answer went out, so the peer must be told when we
    /// hang up.
    handshake_sent: AtomicBool,
    /// The remote side already terminated; don't echo `call:end` back.
    remote_terminated: AtomicBool,
    no_answer_task: Mutex<Option<JoinHandle<()>>>,
    /// Handle for the timer task; held weakly so a released controller
    /// is not kept alive by its own timer.
    weak_self: Weak<Self>,
}

impl PeerConnectionController {
    /// Create a controller with a fresh peer link. The returned
    /// receiver is the controller's only reporting channel.
    pub async fn new(
        call_id: CallId,
        chat_id: ChatId,
        transport: Arc<dyn SignalingTransport>,
        link_factory: Arc<dyn PeerLinkFactory>,
        no_answer_timeout: Duration,
    ) -> Result<(Arc<Self>, mpsc::Receiver<PeerEvent>), CallError> {
        let (link, link_rx) = link_factory
            .create_link()
            .await
            .map_err(|e| CallError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let controller = Arc::new_cyclic(|weak| Self {
            call_id,
            chat_id,
            transport,
            link,
            events: tx,
            no_answer_timeout,
            local_stream: Mutex::new(None),
            remote_stream: Mutex::new(None),
            closed: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            handshake_sent: AtomicBool::new(false),
            remote_terminated: AtomicBool::new(false),
            no_answer_task: Mutex::new(None),
            weak_self: weak.clone(),
        });

        // The pump exits when the link drops its sender on close, so it
        // never needs to be aborted.
        tokio::spawn(controller.clone().pump_link_events(link_rx));

        Ok((controller, rx))
    }

    /// Acquire local media, send the offer, and arm the no-answer
    /// timer. A media acquisition failure leaves no transport side
    /// effects (no offer is sent).
    pub async fn initiate(
        &self,
        capture: &Arc<dyn MediaCapture>,
        media: CallMediaType,
        caller_id: String,
    ) -> Result<MediaStream, CallError> {
        let stream = capture
            .acquire(MediaOptions::for_media(media))
            .await
            .map_err(|e| CallError::MediaAcquisitionFailure(e.to_string()))?;
        *self.local_stream.lock().await = Some(stream.clone());

        if let Err(e) = self.link.attach_local_stream(&stream).await {
            self.end_call().await;
            return Err(CallError::ConnectionFailed(e.to_string()));
        }

        let offer = match self.link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.end_call().await;
                return Err(CallError::ConnectionFailed(e.to_string()));
            }
        };

        let signal = Signal::Offer(OfferPayload {
            chat_id: self.chat_id.clone(),
            offer,
            caller_id,
            video_mode: media == CallMediaType::Video,
        });
        if let Err(e) = self.transport.send(signal).await {
            self.end_call().await;
            return Err(CallError::Signaling(e.to_string()));
        }
        self.handshake_sent.store(true, Ordering::SeqCst);

        self.arm_no_answer_timer().await;

        debug!(target: "Calls/Peer", "offer sent for call {} (chat {})", self.call_id, self.chat_id);
        Ok(stream)
    }

    /// Acquire local media, apply the remote offer, and send the
    /// answer.
    pub async fn answer(
        &self,
        capture: &Arc<dyn MediaCapture>,
        media: CallMediaType,
        remote_offer: SessionDescription,
    ) -> Result<MediaStream, CallError> {
        let stream = capture
            .acquire(MediaOptions::for_media(media))
            .await
            .map_err(|e| CallError::MediaAcquisitionFailure(e.to_string()))?;
        *self.local_stream.lock().await = Some(stream.clone());

        if let Err(e) = self.link.attach_local_stream(&stream).await {
            self.end_call().await;
            return Err(CallError::ConnectionFailed(e.to_string()));
        }

        let answer = match self.link.create_answer(&remote_offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.end_call().await;
                return Err(CallError::ConnectionFailed(e.to_string()));
            }
        };

        let signal = Signal::Answer(AnswerPayload {
            chat_id: self.chat_id.clone(),
            answer,
        });
        if let Err(e) = self.transport.send(signal).await {
            self.end_call().await;
            return Err(CallError::Signaling(e.to_string()));
        }
        self.handshake_sent.store(true, Ordering::SeqCst);

        debug!(target: "Calls/Peer", "answer sent for call {} (chat {})", self.call_id, self.chat_id);
        Ok(stream)
    }

    /// Apply the remote answer to an outgoing handshake. Discarded
    /// quietly if the controller was already torn down.
    pub async fn apply_remote_answer(&self, answer: SessionDescription) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(target: "Calls/Peer", "discarding late answer for call {}", self.call_id);
            return;
        }
        self.answered.store(true, Ordering::SeqCst);
        self.cancel_no_answer_timer().await;

        if let Err(e) = self.link.apply_remote_answer(answer).await {
            self.end_call().await;
            let _ = self
                .events
                .send(PeerEvent::Error(format!("applying remote answer: {e}")))
                .await;
        }
    }

    /// Apply an inbound ICE candidate. Out-of-order or late candidates
    /// after teardown are discarded, not errored.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(target: "Calls/Peer", "discarding late candidate for call {}", self.call_id);
            return;
        }
        if let Err(e) = self.link.add_ice_candidate(candidate).await {
            debug!(target: "Calls/Peer", "ignoring candidate error for call {}: {}", self.call_id, e);
        }
    }

    /// Set the local audio track's enabled state without
    /// renegotiating. Level-driven so the session's mute flag is the
    /// single source of truth.
    pub async fn set_audio_enabled(&self, enabled: bool) {
        self.set_track_enabled(TrackKind::Audio, enabled).await;
    }

    /// Set the local video track's enabled state without
    /// renegotiating.
    pub async fn set_video_enabled(&self, enabled: bool) {
        self.set_track_enabled(TrackKind::Video, enabled).await;
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let stream = self.local_stream.lock().await;
        match stream.as_ref().and_then(|s| s.track(kind)) {
            Some(track) => track.set_enabled(enabled),
            None => {
                debug!(target: "Calls/Peer", "no {:?} track to set for call {}", kind, self.call_id);
            }
        }
    }

    /// Send a reject without ever acquiring media.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.remote_terminated.store(true, Ordering::SeqCst);
        self.transport
            .send(Signal::Reject(CallRef {
                chat_id: self.chat_id.clone(),
            }))
            .await
            .map_err(|e| CallError::Signaling(e.to_string()))
    }

    /// Mark that the remote side already terminated, so teardown does
    /// not echo a `call:end` back at it.
    pub fn mark_remote_terminated(&self) {
        self.remote_terminated.store(true, Ordering::SeqCst);
    }

    /// Idempotent teardown: stops and releases every local and remote
    /// track, closes the link and cancels the no-answer timer. Emits a
    /// `call:end` signal only if a handshake went out and the remote
    /// side has not already terminated.
    pub async fn end_call(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_no_answer_timer().await;

        if let Some(stream) = self.local_stream.lock().await.take() {
            stream.stop_all();
        }
        if let Some(stream) = self.remote_stream.lock().await.take() {
            stream.stop_all();
        }
        self.link.close().await;

        if self.handshake_sent.load(Ordering::SeqCst)
            && !self.remote_terminated.load(Ordering::SeqCst)
        {
            let end = Signal::End(CallRef {
                chat_id: self.chat_id.clone(),
            });
            if let Err(e) = self.transport.send(end).await {
                warn!(target: "Calls/Peer", "failed to send end signal for call {}: {}", self.call_id, e);
            }
        }
        debug!(target: "Calls/Peer", "controller for call {} released", self.call_id);
    }

    async fn arm_no_answer_timer(&self) {
        let weak = self.weak_self.clone();
        let timeout = self.no_answer_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(controller) = weak.upgrade() else {
                return;
            };
            if controller.answered.load(Ordering::SeqCst)
                || controller.closed.load(Ordering::SeqCst)
            {
                return;
            }
            // Take our own handle out first so teardown doesn't abort
            // the currently running task.
            controller.no_answer_task.lock().await.take();
            controller.end_call().await;
            let _ = controller.events.send(PeerEvent::NoAnswer).await;
        });
        *self.no_answer_task.lock().await = Some(handle);
    }

    async fn cancel_no_answer_timer(&self) {
        if let Some(handle) = self.no_answer_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn pump_link_events(self: Arc<Self>, mut rx: mpsc::Receiver<LinkEvent>) {
        while let Some(event) = rx.recv().await {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            match event {
                LinkEvent::RemoteStream(stream) => {
                    self.answered.store(true, Ordering::SeqCst);
                    self.cancel_no_answer_timer().await;
                    *self.remote_stream.lock().await = Some(stream.clone());
                    let _ = self.events.send(PeerEvent::RemoteStream(stream)).await;
                }
                LinkEvent::StateChanged { connection, ice } => {
                    // A failed ICE negotiation is terminal; a dropped
                    // connection merely degrades and may recover.
                    if ice == IceState::Failed {
                        self.end_call().await;
                        let _ = self
                            .events
                            .send(PeerEvent::ConnectionFailed(
                                "ice negotiation failed".to_string(),
                            ))
                            .await;
                        break;
                    }
                    let _ = self
                        .events
                        .send(PeerEvent::ConnectionState { connection, ice })
                        .await;
                }
                LinkEvent::RemoteEnded => {
                    self.remote_terminated.store(true, Ordering::SeqCst);
                    self.end_call().await;
                    let _ = self.events.send(PeerEvent::CallEnd).await;
                    break;
                }
                LinkEvent::RemoteBusy => {
                    self.remote_terminated.store(true, Ordering::SeqCst);
                    self.end_call().await;
                    let _ = self.events.send(PeerEvent::Busy).await;
                    break;
                }
            }
        }
    }
}
