//! Call session manager.
//!
//! Single source of truth for the active call. Arbitrates concurrency
//! (at most one non-idle session process-wide), owns the public control
//! API, and converts asynchronous, partially-ordered signaling and
//! media events into coherent session state for its observers.
//!
//! Every exit path (local hang-up, decline, remote termination, any
//! failure) routes through the same unconditional cleanup that
//! releases the controller (and with it the device tracks) and every
//! live timer before the session is dropped.

use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CallConfig;
use crate::directory::Directory;
use crate::error::CallError;
use crate::events::{CHANNEL_CAPACITY, CallEvent};
use crate::link::{IceState, LinkConnectionState, PeerLinkFactory};
use crate::media::{MediaCapture, MediaStream, TrackKind};
use crate::peer::{PeerConnectionController, PeerEvent};
use crate::quality::NetworkQualityMonitor;
use crate::session::{CallSession, CallSessionState, CallTransition, PendingOffer};
use crate::signaling::{CallRef, Signal, SignalingLinkState, SignalingTransport};
use crate::types::{CallDirection, CallId, CallMediaType, ChatId, Contact, NetworkState};

/// The single active call and everything owned on its behalf.
struct ActiveCall {
    session: CallSession,
    pending_offer: Option<PendingOffer>,
    /// An accept consumed the pending offer and is driving the answer
    /// handshake; a duplicate accept is a harmless no-op.
    answering: bool,
    controller: Option<Arc<PeerConnectionController>>,
    quality: NetworkQualityMonitor,
    /// Duration ticker; armed iff the session is connected.
    ticker: Option<JoinHandle<()>>,
}

impl ActiveCall {
    fn new(session: CallSession, pending_offer: Option<PendingOffer>) -> Self {
        Self {
            session,
            pending_offer,
            answering: false,
            controller: None,
            quality: NetworkQualityMonitor::new(),
            ticker: None,
        }
    }

    fn matches_chat(&self, chat_id: &ChatId) -> bool {
        self.session.chat_id.as_ref() == Some(chat_id)
            || self
                .pending_offer
                .as_ref()
                .is_some_and(|p| p.chat_id == *chat_id)
    }
}

/// Owns the single active [`CallSession`] and the public control
/// surface. Built once per client and handed by reference to whichever
/// layer needs it.
pub struct CallSessionManager {
    /// Our own identity, sent as `callerId` in outgoing offers.
    self_id: String,
    config: CallConfig,
    capture: Arc<dyn MediaCapture>,
    link_factory: Arc<dyn PeerLinkFactory>,
    directory: Arc<dyn Directory>,
    /// Attached by the client once its socket exists; absent means
    /// calls fail fast with `TransportUnavailable`.
    transport: RwLock<Option<Arc<dyn SignalingTransport>>>,
    events: broadcast::Sender<CallEvent>,
    active: Mutex<Option<ActiveCall>>,
    /// Handle for the tasks this manager spawns. Background work holds
    /// the manager weakly so a dropped manager winds its tasks down.
    weak_self: Weak<Self>,
}

impl CallSessionManager {
    pub fn new(
        self_id: impl Into<String>,
        config: CallConfig,
        capture: Arc<dyn MediaCapture>,
        link_factory: Arc<dyn PeerLinkFactory>,
        directory: Arc<dyn Directory>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_id: self_id.into(),
            config,
            capture,
            link_factory,
            directory,
            transport: RwLock::new(None),
            events: broadcast::channel(CHANNEL_CAPACITY).0,
            active: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    /// Strong handle for spawning. Always succeeds while any caller
    /// still holds the manager.
    fn strong(&self) -> Option<Arc<Self>> {
        self.weak_self.upgrade()
    }

    /// Subscribe to the observer event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Attach (or replace) the signaling transport.
    pub async fn set_signaling_transport(&self, transport: Arc<dyn SignalingTransport>) {
        *self.transport.write().await = Some(transport);
    }

    /// Snapshot of the current session, if any.
    pub async fn current_session(&self) -> Option<CallSession> {
        self.active.lock().await.as_ref().map(|c| c.session.clone())
    }

    /// Elapsed time since the call first connected.
    pub async fn elapsed(&self) -> Option<Duration> {
        self.active.lock().await.as_ref().and_then(|c| c.session.elapsed())
    }

    // ==================== Control surface ====================

    /// Start an outgoing call.
    ///
    /// Rejected with `CallInProgress` if a session already exists. A
    /// missing chat id or missing transport creates the session, then
    /// immediately tears it down with the error surfaced, a
    /// deliberate fail-fast rather than a silent no-op. All further
    /// progress (transport readiness, media, handshake) is observed
    /// through the event stream.
    pub async fn start_outgoing_call(
        &self,
        contact_id: &str,
        media: CallMediaType,
        chat_id: Option<ChatId>,
    ) -> Result<CallId, CallError> {
        let contact = self.lookup_contact(contact_id, chat_id.as_ref()).await;

        let call_id = CallId::generate();
        let session =
            CallSession::new_outgoing(call_id.clone(), chat_id.clone(), contact, media);

        {
            let mut active = self.active.lock().await;
            if active.is_some() {
                return Err(CallError::CallInProgress);
            }
            *active = Some(ActiveCall::new(session.clone(), None));
        }
        info!(target: "Calls/Manager", "outgoing {:?} call {} started", media, call_id);
        let _ = self.events.send(CallEvent::SessionChanged(Some(session)));

        let Some(chat_id) = chat_id else {
            self.fail_call(&call_id, CallError::MissingContext).await;
            return Err(CallError::MissingContext);
        };
        let Some(transport) = self.transport.read().await.clone() else {
            self.fail_call(&call_id, CallError::TransportUnavailable).await;
            return Err(CallError::TransportUnavailable);
        };

        if let Some(manager) = self.strong() {
            let id = call_id.clone();
            tokio::spawn(async move {
                manager.drive_outgoing(id, chat_id, media, transport).await;
            });
        }

        Ok(call_id)
    }

    /// Accept the ringing incoming call.
    ///
    /// The pending offer is cleared synchronously, before the handshake
    /// runs, so a racing duplicate accept or decline observes no offer
    /// and becomes a no-op. Accepting without the required precondition
    /// is an inconsistent-state failure that triggers defensive
    /// cleanup.
    pub async fn accept_call(&self) -> Result<(), CallError> {
        enum Outcome {
            Proceed(PendingOffer, CallId, CallMediaType),
            Duplicate,
            Inconsistent(Option<CallId>),
        }

        let outcome = {
            let mut active = self.active.lock().await;
            match active.as_mut() {
                None => Outcome::Inconsistent(None),
                Some(call) => match call.pending_offer.take() {
                    Some(offer) => {
                        call.answering = true;
                        Outcome::Proceed(offer, call.session.id.clone(), call.session.media)
                    }
                    None if call.answering => Outcome::Duplicate,
                    None => Outcome::Inconsistent(Some(call.session.id.clone())),
                },
            }
        };

        match outcome {
            Outcome::Duplicate => Ok(()),
            Outcome::Inconsistent(None) => {
                Err(CallError::InconsistentState("accept with no active call".into()))
            }
            Outcome::Inconsistent(Some(id)) => {
                let err = CallError::InconsistentState("accept without a pending offer".into());
                self.fail_call(&id, err.clone()).await;
                Err(err)
            }
            Outcome::Proceed(offer, call_id, media) => {
                let Some(transport) = self.transport.read().await.clone() else {
                    self.fail_call(&call_id, CallError::TransportUnavailable).await;
                    return Err(CallError::TransportUnavailable);
                };
                info!(target: "Calls/Manager", "accepting incoming call {}", call_id);
                if let Some(manager) = self.strong() {
                    tokio::spawn(async move {
                        manager.drive_answer(call_id, offer, media, transport).await;
                    });
                }
                Ok(())
            }
        }
    }

    /// Decline the ringing incoming call. No media is ever acquired for
    /// a declined call. Losing the race against a concurrent accept is
    /// a no-op.
    pub async fn decline_call(&self) -> Result<(), CallError> {
        let (call_id, chat_id, controller) = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut() else {
                return Err(CallError::InconsistentState("decline with no active call".into()));
            };
            if call.pending_offer.take().is_none() {
                if call.session.direction == CallDirection::Incoming && call.session.is_ringing() {
                    // Lost the race against accept (or a second decline).
                    return Ok(());
                }
                return Err(CallError::InconsistentState(
                    "decline outside of a ringing incoming call".into(),
                ));
            }
            (
                call.session.id.clone(),
                call.session.chat_id.clone(),
                call.controller.clone(),
            )
        };

        info!(target: "Calls/Manager", "declining incoming call {}", call_id);
        if let Some(controller) = controller {
            if let Err(e) = controller.reject_call().await {
                warn!(target: "Calls/Manager", "failed to send reject: {}", e);
            }
        } else if let Some(chat_id) = chat_id {
            if let Some(transport) = self.transport.read().await.clone() {
                let reject = Signal::Reject(CallRef { chat_id });
                if let Err(e) = transport.send(reject).await {
                    warn!(target: "Calls/Manager", "failed to send reject: {}", e);
                }
            }
        }

        self.destroy(Some(&call_id), None).await;
        Ok(())
    }

    /// End the current call, whatever its state. The single
    /// unconditional cleanup path: releases the controller (closing
    /// local and remote media), clears every timer, and sets the
    /// session to none. Safe to call with no session.
    ///
    /// A still-ringing incoming call has no controller to signal
    /// through, so the remote caller is told directly, the same way a
    /// decline is.
    pub async fn end_call(&self) {
        let unanswered_chat = {
            let mut active = self.active.lock().await;
            active
                .as_mut()
                .and_then(|call| call.pending_offer.take())
                .map(|pending| pending.chat_id)
        };
        if let Some(chat_id) = unanswered_chat {
            if let Some(transport) = self.transport.read().await.clone() {
                let reject = Signal::Reject(CallRef { chat_id });
                if let Err(e) = transport.send(reject).await {
                    warn!(target: "Calls/Manager", "failed to send reject: {}", e);
                }
            }
        }
        self.destroy(None, None).await;
    }

    /// Flip the local mute flag and push the new level to the
    /// controller's audio track. Never changes the call state. The
    /// flag is authoritative: a toggle issued before media exists is
    /// applied when the stream is acquired.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let (controller, value, snapshot) = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut() else {
                return Err(CallError::InconsistentState("toggle with no active call".into()));
            };
            call.session.muted = !call.session.muted;
            (call.controller.clone(), call.session.muted, call.session.clone())
        };
        if let Some(controller) = controller {
            controller.set_audio_enabled(!value).await;
        }
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
        Ok(value)
    }

    /// Flip the loudspeaker flag. Local routing only; nothing is
    /// forwarded to the controller.
    pub async fn toggle_speaker(&self) -> Result<bool, CallError> {
        let (value, snapshot) = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut() else {
                return Err(CallError::InconsistentState("toggle with no active call".into()));
            };
            call.session.speaker_on = !call.session.speaker_on;
            (call.session.speaker_on, call.session.clone())
        };
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
        Ok(value)
    }

    /// Flip the camera-off flag and push the new level to the
    /// controller's video track.
    pub async fn toggle_camera(&self) -> Result<bool, CallError> {
        let (controller, value, snapshot) = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut() else {
                return Err(CallError::InconsistentState("toggle with no active call".into()));
            };
            call.session.camera_off = !call.session.camera_off;
            (call.controller.clone(), call.session.camera_off, call.session.clone())
        };
        if let Some(controller) = controller {
            controller.set_video_enabled(!value).await;
        }
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
        Ok(value)
    }

    /// Flip between front and back camera. The capture adapter reads
    /// the flag; no track instruction is involved.
    pub async fn switch_camera(&self) -> Result<bool, CallError> {
        let (value, snapshot) = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut() else {
                return Err(CallError::InconsistentState("toggle with no active call".into()));
            };
            call.session.front_camera = !call.session.front_camera;
            (call.session.front_camera, call.session.clone())
        };
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
        Ok(value)
    }

    // ==================== Inbound signaling ====================

    /// Dispatch one inbound signaling event. The embedding client calls
    /// this in delivery order; no reordering or coalescing happens
    /// here.
    pub async fn handle_signal(&self, signal: Signal) {
        debug!(
            target: "Calls/Manager",
            "inbound {} for chat {}",
            signal.event_name(),
            signal.chat_id()
        );
        match signal {
            Signal::Offer(payload) => self.register_incoming_offer(payload).await,
            Signal::Answer(payload) => {
                match self.controller_for(&payload.chat_id).await {
                    Some(controller) => controller.apply_remote_answer(payload.answer).await,
                    None => {
                        debug!(target: "Calls/Manager", "discarding answer for unknown chat {}", payload.chat_id)
                    }
                }
            }
            Signal::IceCandidate(payload) => {
                match self.controller_for(&payload.chat_id).await {
                    Some(controller) => controller.add_ice_candidate(payload.candidate).await,
                    None => {
                        debug!(target: "Calls/Manager", "discarding candidate for unknown chat {}", payload.chat_id)
                    }
                }
            }
            Signal::End(payload) => self.on_remote_terminate(&payload.chat_id, false).await,
            Signal::Reject(payload) => self.on_remote_terminate(&payload.chat_id, true).await,
        }
    }

    /// Convenience pump for clients that deliver signals over a
    /// channel.
    pub async fn run_signaling(self: Arc<Self>, mut rx: mpsc::Receiver<Signal>) {
        while let Some(signal) = rx.recv().await {
            self.handle_signal(signal).await;
        }
    }

    /// Register an inbound offer as a ringing incoming call. Ignored
    /// entirely while any call exists: no queuing, no second ringer.
    async fn register_incoming_offer(&self, payload: crate::signaling::OfferPayload) {
        if self.active.lock().await.is_some() {
            info!(
                target: "Calls/Manager",
                "ignoring offer for chat {} while another call is active",
                payload.chat_id
            );
            return;
        }

        let contact = self
            .lookup_contact(&payload.caller_id, Some(&payload.chat_id))
            .await;
        let media = if payload.video_mode {
            CallMediaType::Video
        } else {
            CallMediaType::Audio
        };
        let session = CallSession::new_incoming(
            CallId::generate(),
            payload.chat_id.clone(),
            contact,
            media,
        );
        let pending = PendingOffer {
            chat_id: payload.chat_id,
            remote_offer: payload.offer,
            video_requested: payload.video_mode,
        };

        let snapshot = {
            let mut active = self.active.lock().await;
            // The directory lookup awaited; re-check the invariant.
            if active.is_some() {
                info!(target: "Calls/Manager", "ignoring offer raced by another call");
                return;
            }
            *active = Some(ActiveCall::new(session.clone(), Some(pending)));
            session
        };
        info!(target: "Calls/Manager", "incoming {:?} call {} ringing", media, snapshot.id);
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
    }

    /// Remote `call:end` / `call:reject` for the current call. Same
    /// cleanup as a local hang-up; a termination before the call ever
    /// connected is surfaced to the user.
    async fn on_remote_terminate(&self, chat_id: &ChatId, rejected: bool) {
        let (call_id, reached_connected, controller) = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(call) if call.matches_chat(chat_id) => (
                    call.session.id.clone(),
                    call.session.reached_connected(),
                    call.controller.clone(),
                ),
                _ => {
                    debug!(target: "Calls/Manager", "ignoring terminate for unknown chat {}", chat_id);
                    return;
                }
            }
        };

        if let Some(controller) = controller {
            controller.mark_remote_terminated();
        }
        let notify = match (rejected, reached_connected) {
            (true, false) => Some(CallEvent::CallFailed(CallError::RemoteRejected)),
            (false, false) => Some(CallEvent::CallCancelled),
            _ => None,
        };
        info!(target: "Calls/Manager", "remote terminated call {}", call_id);
        self.destroy(Some(&call_id), notify).await;
    }

    // ==================== Setup tasks ====================

    /// Outgoing setup: wait for the signaling channel, then hand the
    /// handshake to a fresh controller. Every resumption re-validates
    /// the active call id, so a torn-down attempt cannot mutate a later
    /// session.
    async fn drive_outgoing(
        self: Arc<Self>,
        call_id: CallId,
        chat_id: ChatId,
        media: CallMediaType,
        transport: Arc<dyn SignalingTransport>,
    ) {
        if let Err(e) = Self::wait_for_transport(&transport, self.config.outgoing_connect_wait).await
        {
            self.fail_call(&call_id, e).await;
            return;
        }

        let Some(controller) = self
            .build_controller(&call_id, &chat_id, transport)
            .await
        else {
            return;
        };

        match controller.initiate(&self.capture, media, self.self_id.clone()).await {
            Ok(stream) => self.publish_local_stream(&call_id, stream).await,
            Err(e) => self.fail_call(&call_id, e).await,
        }
    }

    /// Accept-path setup, mirroring the outgoing one with the shorter
    /// connect bound.
    async fn drive_answer(
        self: Arc<Self>,
        call_id: CallId,
        offer: PendingOffer,
        media: CallMediaType,
        transport: Arc<dyn SignalingTransport>,
    ) {
        if let Err(e) = Self::wait_for_transport(&transport, self.config.accept_connect_wait).await
        {
            self.fail_call(&call_id, e).await;
            return;
        }

        let Some(controller) = self
            .build_controller(&call_id, &offer.chat_id, transport)
            .await
        else {
            return;
        };

        match controller.answer(&self.capture, media, offer.remote_offer).await {
            Ok(stream) => self.publish_local_stream(&call_id, stream).await,
            Err(e) => self.fail_call(&call_id, e).await,
        }
    }

    /// Publish a freshly acquired local stream, first applying the
    /// session's mute/camera flags to its tracks. A toggle issued
    /// while the stream was still being acquired lands here instead of
    /// being lost.
    async fn publish_local_stream(&self, call_id: &CallId, stream: MediaStream) {
        let flags = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .filter(|c| c.session.id == *call_id)
                .map(|c| (c.session.muted, c.session.camera_off))
        };
        let Some((muted, camera_off)) = flags else {
            return;
        };
        if let Some(track) = stream.track(TrackKind::Audio) {
            track.set_enabled(!muted);
        }
        if let Some(track) = stream.track(TrackKind::Video) {
            track.set_enabled(!camera_off);
        }
        let _ = self.events.send(CallEvent::LocalStream(stream));
    }

    /// Create a controller for the given attempt and attach it to the
    /// active call. Returns `None` (after releasing the controller) if
    /// the attempt was torn down in the meantime.
    async fn build_controller(
        &self,
        call_id: &CallId,
        chat_id: &ChatId,
        transport: Arc<dyn SignalingTransport>,
    ) -> Option<Arc<PeerConnectionController>> {
        let created = PeerConnectionController::new(
            call_id.clone(),
            chat_id.clone(),
            transport,
            self.link_factory.clone(),
            self.config.no_answer_timeout,
        )
        .await;

        let (controller, rx) = match created {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_call(call_id, e).await;
                return None;
            }
        };

        let attached = {
            let mut active = self.active.lock().await;
            match active.as_mut() {
                Some(call) if call.session.id == *call_id => {
                    call.controller = Some(controller.clone());
                    true
                }
                _ => false,
            }
        };
        if !attached {
            controller.end_call().await;
            return None;
        }

        if let Some(manager) = self.strong() {
            let id = call_id.clone();
            tokio::spawn(async move {
                manager.pump_peer_events(id, rx).await;
            });
        }

        Some(controller)
    }

    /// Wait for the signaling channel to report connected, bounded. A
    /// transport-level connect failure aborts immediately.
    async fn wait_for_transport(
        transport: &Arc<dyn SignalingTransport>,
        bound: Duration,
    ) -> Result<(), CallError> {
        let mut state = transport.link_state();
        let wait = async move {
            loop {
                match *state.borrow_and_update() {
                    SignalingLinkState::Connected => return Ok(()),
                    SignalingLinkState::Failed => return Err(CallError::TransportUnavailable),
                    _ => {}
                }
                if state.changed().await.is_err() {
                    return Err(CallError::TransportUnavailable);
                }
            }
        };
        match tokio::time::timeout(bound, wait).await {
            Ok(result) => result,
            Err(_) => Err(CallError::ConnectTimeout),
        }
    }

    // ==================== Event handling ====================

    async fn pump_peer_events(self: Arc<Self>, call_id: CallId, mut rx: mpsc::Receiver<PeerEvent>) {
        while let Some(event) = rx.recv().await {
            if !self.is_current(&call_id).await {
                break;
            }
            match event {
                PeerEvent::RemoteStream(stream) => self.on_remote_stream(&call_id, stream).await,
                PeerEvent::ConnectionState { connection, ice } => {
                    self.on_connection_state(&call_id, connection, ice).await
                }
                PeerEvent::NoAnswer => {
                    self.fail_call(&call_id, CallError::RemoteNoAnswer).await;
                    break;
                }
                PeerEvent::Busy => {
                    self.fail_call(&call_id, CallError::RemoteBusy).await;
                    break;
                }
                PeerEvent::CallEnd => {
                    self.on_peer_reported_end(&call_id).await;
                    break;
                }
                PeerEvent::ConnectionFailed(reason) => {
                    self.fail_call(&call_id, CallError::ConnectionFailed(reason)).await;
                    break;
                }
                PeerEvent::Error(reason) => {
                    self.fail_call(&call_id, CallError::Signaling(reason)).await;
                    break;
                }
            }
        }
    }

    /// The controller reported the remote stream: the only trigger for
    /// the transition into connected. Arms the duration ticker.
    async fn on_remote_stream(&self, call_id: &CallId, stream: MediaStream) {
        let snapshot = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut().filter(|c| c.session.id == *call_id) else {
                return;
            };
            if let Err(e) = call.session.apply_transition(CallTransition::MediaConnected) {
                debug!(target: "Calls/Manager", "ignoring remote stream: {}", e);
                return;
            }
            call.answering = false;
            if let Some(started) = call.session.started_at {
                call.ticker = Some(self.spawn_ticker(call_id.clone(), started));
            }
            call.session.clone()
        };
        info!(target: "Calls/Manager", "call {} connected", call_id);
        let _ = self.events.send(CallEvent::RemoteStream(stream));
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
    }

    /// Every connection-state change runs through the quality monitor
    /// while the session lives; a degraded link moves the session to
    /// reconnecting (ticker disarmed), recovery moves it back (ticker
    /// re-armed against the original start instant).
    async fn on_connection_state(
        &self,
        call_id: &CallId,
        connection: LinkConnectionState,
        ice: IceState,
    ) {
        let snapshot = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut().filter(|c| c.session.id == *call_id) else {
                return;
            };
            let Some(network) = call.quality.observe(connection, ice) else {
                return;
            };
            call.session.network_state = network;
            match network {
                NetworkState::Reconnecting
                    if call.session.state == CallSessionState::Connected =>
                {
                    let _ = call.session.apply_transition(CallTransition::LinkDegraded);
                    if let Some(ticker) = call.ticker.take() {
                        ticker.abort();
                    }
                }
                NetworkState::Good if call.session.state == CallSessionState::Reconnecting => {
                    let _ = call.session.apply_transition(CallTransition::LinkRecovered);
                    if let Some(started) = call.session.started_at {
                        call.ticker = Some(self.spawn_ticker(call_id.clone(), started));
                    }
                }
                _ => {}
            }
            call.session.clone()
        };
        debug!(
            target: "Calls/Manager",
            "call {} network state now {:?}",
            call_id, snapshot.network_state
        );
        let _ = self.events.send(CallEvent::SessionChanged(Some(snapshot)));
    }

    /// The controller observed the remote side hanging up at the media
    /// layer. Same handling as a remote `call:end` signal.
    async fn on_peer_reported_end(&self, call_id: &CallId) {
        let reached_connected = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(call) if call.session.id == *call_id => call.session.reached_connected(),
                _ => return,
            }
        };
        let notify = (!reached_connected).then_some(CallEvent::CallCancelled);
        self.destroy(Some(call_id), notify).await;
    }

    // ==================== Cleanup ====================

    async fn is_current(&self, call_id: &CallId) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.session.id == *call_id)
    }

    fn spawn_ticker(&self, call_id: CallId, started: Instant) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        let interval = self.config.tick_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if !manager.is_current(&call_id).await {
                    break;
                }
                let _ = manager
                    .events
                    .send(CallEvent::DurationTick(started.elapsed().as_secs()));
            }
        })
    }

    async fn fail_call(&self, call_id: &CallId, error: CallError) {
        warn!(target: "Calls/Manager", "call {} failed: {}", call_id, error);
        self.destroy(Some(call_id), Some(CallEvent::CallFailed(error))).await;
    }

    /// The one cleanup path. Takes the active call out (if it is still
    /// the expected one), disarms the ticker and releases the controller,
    /// which stops every device track, and only then reports the
    /// destruction.
    async fn destroy(&self, expected: Option<&CallId>, notify: Option<CallEvent>) {
        let call = {
            let mut active = self.active.lock().await;
            let still_expected = match (&*active, expected) {
                (Some(current), Some(id)) => current.session.id == *id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if still_expected { active.take() } else { None }
        };
        let Some(mut call) = call else {
            return;
        };

        if let Some(ticker) = call.ticker.take() {
            ticker.abort();
        }
        if let Some(controller) = call.controller.take() {
            controller.end_call().await;
        }
        info!(target: "Calls/Manager", "call {} destroyed", call.session.id);
        let _ = self.events.send(CallEvent::SessionChanged(None));
        if let Some(event) = notify {
            let _ = self.events.send(event);
        }
    }

    async fn controller_for(&self, chat_id: &ChatId) -> Option<Arc<PeerConnectionController>> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|c| c.matches_chat(chat_id))
            .and_then(|c| c.controller.clone())
    }

    /// Resolve the counterpart's display identity. Falls back to the
    /// chat name, then to a placeholder; lookups never abort setup.
    async fn lookup_contact(&self, contact_id: &str, chat_id: Option<&ChatId>) -> Contact {
        if let Some(contact) = self.directory.contact_by_id(contact_id).await {
            return contact;
        }
        if let Some(chat_id) = chat_id
            && let Some(chat) = self.directory.chat_by_id(chat_id).await
        {
            return Contact::new(contact_id, chat.name, crate::types::PresenceHint::Unknown);
        }
        Contact::placeholder(contact_id)
    }
}
