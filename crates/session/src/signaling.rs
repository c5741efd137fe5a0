//! Realtime signaling transport
//!
//! Negotiates one WebRTC peer connection against the realtime API:
//! local opus track for the microphone, an "oai-events" data channel
//! for JSON signaling, SDP offer/answer over plain HTTPS. Inbound
//! channel messages are decoded into [`ServerEvent`]s; outbound
//! session updates are deduplicated against the last sent value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::API;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use voice_client_config::constants::{audio, session, timeouts};
use voice_client_config::SessionConfig;
use voice_client_core::{
    now_ms, AudioFrame, AudioInput, ClientEvent, OpenRequest, ServerEvent, SessionError,
    SignalingConnection, SignalingTransport,
};

use crate::codec::{OpusDecoder, OpusEncoder};
use crate::observability::truncate_field;

/// Inbound events buffered between the channel callback and the
/// session pump.
const EVENT_QUEUE: usize = 64;

/// Decoded remote frames buffered for the playback consumer.
const REMOTE_AUDIO_QUEUE: usize = 100;

/// ICE gathering grace before sending the offer with whatever
/// candidates arrived.
const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: audio::SAMPLE_RATE_HZ,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Opens realtime sessions over WebRTC plus HTTPS SDP exchange.
pub struct RealtimeSignaling {
    config: SessionConfig,
    http: reqwest::Client,
    log_field_max_chars: usize,
}

impl RealtimeSignaling {
    pub fn new(config: SessionConfig, log_field_max_chars: usize) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            log_field_max_chars,
        }
    }

    fn create_api(&self) -> Result<API, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: 111,
                    stats_id: String::new(),
                },
                webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio,
            )
            .map_err(|e| SessionError::Negotiation(format!("codec registration: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| SessionError::Negotiation(format!("interceptor registry: {e}")))?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_timeouts(
            Some(Duration::from_secs(timeouts::ICE_DISCONNECTED_TIMEOUT_SECS)),
            Some(Duration::from_secs(timeouts::ICE_FAILED_TIMEOUT_SECS)),
            Some(Duration::from_secs(timeouts::ICE_KEEPALIVE_INTERVAL_SECS)),
        );

        Ok(webrtc::api::APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build())
    }

    /// POST the local SDP offer, classify the HTTP outcome, return
    /// the answer SDP.
    async fn exchange_sdp(&self, credential: &str, offer_sdp: String) -> Result<String, SessionError> {
        let url = format!("{}?model={}", self.config.endpoint, self.config.model);
        let response = self
            .http
            .post(&url)
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp)
            .send()
            .await
            .map_err(|e| SessionError::Negotiation(format!("sdp exchange request: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SessionError::Auth);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SessionError::RateLimited);
        }
        if status.is_server_error() {
            return Err(SessionError::ServiceUnavailable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SessionError::Negotiation(format!(
                "sdp exchange rejected: {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SessionError::Negotiation(format!("sdp answer read: {e}")))
    }
}

#[async_trait]
impl SignalingTransport for RealtimeSignaling {
    async fn open(
        &self,
        request: OpenRequest,
    ) -> Result<Box<dyn SignalingConnection>, SessionError> {
        let api = self.create_api()?;
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .map_err(|e| SessionError::Negotiation(format!("peer connection: {e}")))?,
        );

        match self.negotiate(&pc, request).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                // Half-built sessions must not leak the device or
                // the peer connection.
                let _ = pc.close().await;
                Err(e)
            }
        }
    }
}

impl RealtimeSignaling {
    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        request: OpenRequest,
    ) -> Result<Box<dyn SignalingConnection>, SessionError> {
        let (closed_tx, closed_rx) = watch::channel(false);

        let state_closed = closed_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(state = ?state, "peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
            ) {
                let _ = state_closed.send(true);
            }
            Box::pin(async {})
        }));

        let dc = pc
            .create_data_channel(session::DATA_CHANNEL_LABEL, None)
            .await
            .map_err(|e| SessionError::Negotiation(format!("data channel: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_QUEUE);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let event_tx = event_tx.clone();
            Box::pin(async move {
                let raw = match std::str::from_utf8(&msg.data) {
                    Ok(raw) => raw,
                    Err(_) => {
                        warn!("dropping non-utf8 channel message");
                        return;
                    }
                };
                match ServerEvent::decode(raw, now_ms()) {
                    Some(event) => {
                        let _ = event_tx.send(event).await;
                    }
                    None => {
                        warn!("dropping malformed channel message");
                    }
                }
            })
        }));

        let (open_tx, open_rx) = oneshot::channel::<()>();
        let open_tx = Arc::new(Mutex::new(Some(open_tx)));
        dc.on_open(Box::new(move || {
            if let Some(tx) = open_tx.lock().take() {
                let _ = tx.send(());
            }
            Box::pin(async {})
        }));

        let close_closed = closed_tx.clone();
        dc.on_close(Box::new(move || {
            let _ = close_closed.send(true);
            Box::pin(async {})
        }));

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            "voice-client".to_string(),
        ));
        pc.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| SessionError::Media(format!("audio track attach: {e}")))?;

        // Inbound remote track: opus RTP decoded into playback frames.
        // The reader ends when the peer connection closes.
        let (remote_tx, remote_rx) = mpsc::channel::<AudioFrame>(REMOTE_AUDIO_QUEUE);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            debug!(kind = ?track.kind(), "remote track received");
            let remote_tx = remote_tx.clone();
            Box::pin(async move {
                let decoder = match OpusDecoder::new(audio::SAMPLE_RATE_HZ) {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        warn!(error = %e, "remote track decoder unavailable");
                        return;
                    }
                };
                loop {
                    match track.read_rtp().await {
                        Ok((rtp, _)) => {
                            if rtp.payload.is_empty() {
                                continue;
                            }
                            let samples = match decoder.decode(&rtp.payload) {
                                Ok(samples) => samples,
                                Err(e) => {
                                    warn!(error = %e, "opus decode failed, concealing");
                                    match decoder.decode_plc() {
                                        Ok(samples) => samples,
                                        Err(_) => continue,
                                    }
                                }
                            };
                            let timestamp_ms = (rtp.header.timestamp as u64 * 1000)
                                / audio::SAMPLE_RATE_HZ as u64;
                            let frame =
                                AudioFrame::new(samples, audio::SAMPLE_RATE_HZ, timestamp_ms);
                            if remote_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                debug!("remote track reader finished");
            })
        }));

        let pump = spawn_encoder_pump(request.input.clone(), track)?;

        // Offer first, then wait out ICE gathering so the posted SDP
        // carries the candidates.
        let (gathered_tx, gathered_rx) = oneshot::channel::<()>();
        let gathered_tx = Arc::new(Mutex::new(Some(gathered_tx)));
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            if state == RTCIceGathererState::Complete {
                if let Some(tx) = gathered_tx.lock().take() {
                    let _ = tx.send(());
                }
            }
            Box::pin(async {})
        }));

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| SessionError::Negotiation(format!("offer: {e}")))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| SessionError::Negotiation(format!("local description: {e}")))?;

        if timeout(ICE_GATHER_TIMEOUT, gathered_rx).await.is_err() {
            warn!("ice gathering timed out, proceeding with partial candidates");
        }

        let offer_sdp = match pc.local_description().await {
            Some(desc) => desc.sdp,
            None => offer.sdp,
        };

        let answer_sdp = self.exchange_sdp(&request.credential, offer_sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| SessionError::Negotiation(format!("answer parse: {e}")))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| SessionError::Negotiation(format!("remote description: {e}")))?;

        if timeout(
            Duration::from_millis(self.config.channel_open_timeout_ms),
            open_rx,
        )
        .await
        .is_err()
        {
            return Err(SessionError::ChannelTimeout);
        }

        info!(voice = %request.voice, "signaling channel open");

        let connection = RealtimeConnection {
            pc: pc.clone(),
            dc,
            pump,
            events: Mutex::new(Some(event_rx)),
            remote_audio: Mutex::new(Some(remote_rx)),
            last_instructions: Mutex::new(Some(request.system_prompt.clone())),
            last_voice: Mutex::new(Some(request.voice.clone())),
            closed: AtomicBool::new(false),
            closed_rx,
            log_field_max_chars: self.log_field_max_chars,
        };

        connection
            .send_event(&ClientEvent::initial(
                request.system_prompt,
                request.voice,
                self.config.transcription_model.clone(),
            ))
            .await?;

        Ok(Box::new(connection))
    }
}

/// Owns the encoder task and aborts it on drop, so an error anywhere
/// in negotiation cannot leave a stray pump draining the input.
struct PumpHandle(JoinHandle<()>);

impl PumpHandle {
    fn abort(&self) {
        self.0.abort();
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Pull captured frames, encode, write to the local track.
fn spawn_encoder_pump(
    input: Arc<dyn AudioInput>,
    track: Arc<TrackLocalStaticSample>,
) -> Result<PumpHandle, SessionError> {
    let encoder = OpusEncoder::new(input.sample_rate(), audio::FRAME_MS)?;
    let frame_duration = Duration::from_millis(audio::FRAME_MS as u64);

    Ok(PumpHandle(tokio::spawn(async move {
        while let Some(frame) = input.next_frame().await {
            let packet = match encoder.encode(&frame.samples) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(error = %e, "skipping unencodable frame");
                    continue;
                }
            };
            let sample = Sample {
                data: Bytes::from(packet),
                duration: frame_duration,
                ..Default::default()
            };
            if track.write_sample(&sample).await.is_err() {
                break;
            }
        }
        debug!("encoder pump finished");
    })))
}

/// One live negotiated session.
struct RealtimeConnection {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    pump: PumpHandle,
    events: Mutex<Option<mpsc::Receiver<ServerEvent>>>,
    remote_audio: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    last_instructions: Mutex<Option<String>>,
    last_voice: Mutex<Option<String>>,
    closed: AtomicBool,
    closed_rx: watch::Receiver<bool>,
    log_field_max_chars: usize,
}

impl RealtimeConnection {
    async fn send_event(&self, event: &ClientEvent) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::ChannelNotOpen);
        }
        let json = serde_json::to_string(event)
            .map_err(|e| SessionError::Unknown(format!("event serialize: {e}")))?;
        self.dc
            .send_text(json)
            .await
            .map_err(|_| SessionError::ChannelNotOpen)?;
        Ok(())
    }
}

#[async_trait]
impl SignalingConnection for RealtimeConnection {
    async fn send_instructions(&self, text: &str) -> Result<bool, SessionError> {
        {
            let last = self.last_instructions.lock();
            if last.as_deref() == Some(text) {
                debug!("instructions unchanged, skipping update");
                return Ok(false);
            }
        }
        self.send_event(&ClientEvent::instructions(text)).await?;
        *self.last_instructions.lock() = Some(text.to_string());
        info!(
            instructions = %truncate_field(text, self.log_field_max_chars),
            "instructions updated"
        );
        Ok(true)
    }

    async fn send_voice(&self, name: &str) -> Result<bool, SessionError> {
        {
            let last = self.last_voice.lock();
            if last.as_deref() == Some(name) {
                debug!("voice unchanged, skipping update");
                return Ok(false);
            }
        }
        self.send_event(&ClientEvent::voice(name)).await?;
        *self.last_voice.lock() = Some(name.to_string());
        info!(voice = %name, "voice updated");
        Ok(true)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.events.lock().take()
    }

    fn take_remote_audio(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.remote_audio.lock().take()
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !*self.closed_rx.borrow()
    }

    fn watch_closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pump.abort();
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close");
        }
        debug!("signaling connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_capability_matches_negotiated_codec() {
        let capability = opus_capability();
        assert_eq!(capability.mime_type, "audio/opus");
        assert_eq!(capability.clock_rate, 48_000);
    }

    #[tokio::test]
    async fn test_pump_handle_aborts_task_on_drop() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let pump = PumpHandle(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = tx.send(()).await;
        }));
        drop(pump);

        // The sender goes away with the aborted task, without the
        // task ever reaching its send.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_open_without_network_fails_with_negotiation_class() {
        // Unroutable endpoint: everything up to the SDP POST works
        // offline, the exchange itself must fail cleanly.
        let config = SessionConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            channel_open_timeout_ms: 50,
            ..SessionConfig::default()
        };
        let signaling = RealtimeSignaling::new(config, 200);

        let api = signaling.create_api().unwrap();
        drop(api);

        let err = signaling
            .exchange_sdp("test-credential", "v=0".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(_)));
    }
}
