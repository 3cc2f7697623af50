//! RTSP client session control (RFC 2326 §A.2).
//!
//! A [`ControlSession`] follows the lifecycle of the hosting pipeline and
//! turns each lifecycle transition into control requests:
//!
//! ```text
//! NullToReady      -> connect, DESCRIBE, SETUP per media with `control`
//! ReadyToPaused    -> (no request)
//! PausedToPlaying  -> PLAY
//! PlayingToPaused  -> PAUSE
//! PausedToReady    -> (no request)
//! ReadyToNull      -> TEARDOWN, close
//! ```
//!
//! ## Session phases
//!
//! ```text
//! Closed -> Describing -> Ready -> Paused <-> Playing
//!                           ^        |
//!                           +--------+
//! any -> TearingDown -> Closed
//! ```
//!
//! Every exchange sends one request and blocks until its response. A
//! non-200 status fails the exchange like a transport error does. Nothing
//! is retried, and a failed transition leaves the phase where it stopped.
//! RTP arrives interleaved on the same connection (§10.12) and is pulled
//! with [`ControlSession::receive_packet`] while playing.

pub mod transport;

use std::fmt;

use crate::error::{NetError, ProtocolErrorKind, Result};
use crate::protocol::sdp::MediaDescription;
use crate::protocol::{
    InterleavedFrame, Method, RtspMessage, RtspRequest, RtspResponse, RtspUrl, SessionDescription,
};
use crate::transport::tcp::TcpConnector;
pub use transport::TransportHeader;

/// A request/response channel to an RTSP server.
pub trait ControlChannel {
    /// Write one request.
    fn send(&mut self, request: &RtspRequest) -> Result<()>;

    /// Block until the next response or interleaved frame.
    fn receive(&mut self) -> Result<RtspMessage>;
}

/// Opens [`ControlChannel`]s.
pub trait Connector {
    type Channel: ControlChannel;

    fn connect(&self, url: &RtspUrl) -> Result<Self::Channel>;
}

/// Where the control session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    /// Connecting, describing, and setting up streams.
    Describing,
    /// Streams are set up; nothing is flowing.
    Ready,
    Playing,
    Paused,
    TearingDown,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pipeline lifecycle transitions that drive the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Control session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// `rtsp://` URL of the presentation.
    pub location: String,
}

impl SessionConfig {
    pub fn new(location: &str) -> Self {
        SessionConfig {
            location: location.to_string(),
        }
    }
}

/// One stream that was set up.
#[derive(Debug, Clone)]
pub struct StreamSetup {
    /// Index of the media section in the session description.
    pub media_index: usize,
    pub media: MediaDescription,
    /// Request URI used for SETUP.
    pub uri: String,
    /// Transport confirmed by the server (or the one requested, if the
    /// reply did not carry a readable one).
    pub transport: TransportHeader,
}

/// Client-side RTSP session driven by pipeline state changes.
pub struct ControlSession<C: Connector = TcpConnector> {
    connector: C,
    url: RtspUrl,
    phase: SessionPhase,
    channel: Option<C::Channel>,
    cseq: u32,
    session_id: Option<String>,
    description: Option<SessionDescription>,
    streams: Vec<StreamSetup>,
}

impl ControlSession<TcpConnector> {
    /// Session over plain TCP connections.
    pub fn tcp(config: SessionConfig) -> Result<Self> {
        Self::new(TcpConnector, config)
    }
}

impl<C: Connector> ControlSession<C> {
    pub fn new(connector: C, config: SessionConfig) -> Result<Self> {
        Ok(ControlSession {
            connector,
            url: RtspUrl::parse(&config.location)?,
            phase: SessionPhase::Closed,
            channel: None,
            cseq: 0,
            session_id: None,
            description: None,
            streams: Vec::new(),
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn url(&self) -> &RtspUrl {
        &self.url
    }

    /// Session description from the last DESCRIBE.
    pub fn description(&self) -> Option<&SessionDescription> {
        self.description.as_ref()
    }

    pub fn streams(&self) -> &[StreamSetup] {
        &self.streams
    }

    /// Session identifier assigned by the server at SETUP.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Apply one pipeline transition.
    pub fn change_state(&mut self, change: StateChange) -> Result<()> {
        use SessionPhase::*;
        use StateChange::*;

        tracing::debug!(phase = %self.phase, transition = %change, "state change");
        match (change, self.phase) {
            (NullToReady, Closed) => self.open(),
            (ReadyToPaused, Ready) => {
                self.phase = Paused;
                Ok(())
            }
            (PausedToPlaying, Paused) => {
                self.exchange(Method::Play, self.url.to_string(), &[])?;
                self.phase = Playing;
                tracing::info!(url = %self.url, "playing");
                Ok(())
            }
            (PlayingToPaused, Playing) => {
                self.exchange(Method::Pause, self.url.to_string(), &[])?;
                self.phase = Paused;
                Ok(())
            }
            (PausedToReady, Paused) => {
                self.phase = Ready;
                Ok(())
            }
            (ReadyToNull, phase) if phase != Closed => self.close(),
            (change, phase) => Err(NetError::InvalidTransition {
                from: phase.to_string(),
                transition: change.to_string(),
            }),
        }
    }

    /// Next RTP packet delivered on the control connection. RTCP frames are
    /// skipped, and so are unsolicited responses.
    pub fn receive_packet(&mut self) -> Result<InterleavedFrame> {
        if self.phase != SessionPhase::Playing {
            return Err(NetError::NotActive);
        }
        let channel = self.channel.as_mut().ok_or(NetError::NotActive)?;
        loop {
            match channel.receive()? {
                RtspMessage::Data(frame) if frame.is_rtcp() => {
                    tracing::trace!(channel = frame.channel, "skipping RTCP");
                }
                RtspMessage::Data(frame) => return Ok(frame),
                RtspMessage::Response(response) => {
                    tracing::warn!(status = response.status_code, "unsolicited response");
                }
            }
        }
    }

    fn open(&mut self) -> Result<()> {
        self.phase = SessionPhase::Describing;
        self.streams.clear();
        self.session_id = None;
        self.description = None;

        self.channel = Some(self.connector.connect(&self.url)?);

        let response = self.exchange(
            Method::Describe,
            self.url.to_string(),
            &[("Accept", "application/sdp")],
        )?;
        let sdp = SessionDescription::parse(response.body.as_deref().unwrap_or_default())?;
        tracing::debug!(media = sdp.media.len(), "session description");

        for (media_index, media) in sdp.media.iter().enumerate() {
            let Some(control) = media.control() else {
                tracing::debug!(media_index, "no control attribute, skipping stream");
                continue;
            };
            let uri = self.url.resolve_control(control);
            let requested = TransportHeader::interleaved(self.streams.len()).ok_or_else(|| {
                NetError::InvalidConfig("too many streams for interleaved channels".to_string())
            })?;

            let response = self.exchange(
                Method::Setup,
                uri.clone(),
                &[("Transport", requested.to_string().as_str())],
            )?;

            if self.session_id.is_none() {
                self.session_id = response
                    .get_header("Session")
                    .and_then(|v| v.split(';').next())
                    .map(|id| id.trim().to_string());
            }
            let transport = response
                .get_header("Transport")
                .and_then(TransportHeader::parse)
                .unwrap_or(requested);

            tracing::debug!(media_index, uri = %uri, transport = %transport, "stream set up");
            self.streams.push(StreamSetup {
                media_index,
                media: media.clone(),
                uri,
                transport,
            });
        }

        self.description = Some(sdp);
        self.phase = SessionPhase::Ready;
        tracing::info!(url = %self.url, streams = self.streams.len(), "session ready");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let established = matches!(
            self.phase,
            SessionPhase::Ready | SessionPhase::Playing | SessionPhase::Paused
        );
        self.phase = SessionPhase::TearingDown;

        let result = if established && self.channel.is_some() {
            self.exchange(Method::Teardown, self.url.to_string(), &[])
                .map(|_| ())
        } else {
            Ok(())
        };

        self.channel = None;
        result?;
        self.phase = SessionPhase::Closed;
        tracing::info!(url = %self.url, "session closed");
        Ok(())
    }

    fn exchange(
        &mut self,
        method: Method,
        uri: String,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse> {
        let channel = self.channel.as_mut().ok_or(NetError::NotActive)?;

        self.cseq += 1;
        let mut request = RtspRequest::new(method, &uri).add_header("CSeq", &self.cseq.to_string());
        if let Some(id) = &self.session_id {
            request = request.add_header("Session", id);
        }
        for (name, value) in headers {
            request = request.add_header(name, value);
        }

        channel.send(&request)?;
        let response = loop {
            match channel.receive()? {
                RtspMessage::Response(response) => break response,
                RtspMessage::Data(frame) => {
                    tracing::trace!(channel = frame.channel, "dropping frame while awaiting response");
                }
            }
        };

        if !response.is_success() {
            tracing::warn!(
                %method,
                uri = %uri,
                status = response.status_code,
                reason = %response.status_text,
                "request failed"
            );
            return Err(NetError::protocol(ProtocolErrorKind::ErrorStatus {
                method: method.to_string(),
                code: response.status_code,
                reason: response.status_text,
            }));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted server: answers each request with the next canned response.
    #[derive(Clone, Default)]
    struct Script {
        sent: Arc<Mutex<Vec<RtspRequest>>>,
        replies: Arc<Mutex<VecDeque<RtspMessage>>>,
    }

    impl Script {
        fn reply(&self, message: RtspMessage) -> &Self {
            self.replies.lock().push_back(message);
            self
        }

        fn ok(&self) -> &Self {
            self.reply(RtspMessage::Response(RtspResponse::ok()))
        }

        fn methods(&self) -> Vec<String> {
            self.sent.lock().iter().map(|r| r.method.clone()).collect()
        }
    }

    impl ControlChannel for Script {
        fn send(&mut self, request: &RtspRequest) -> Result<()> {
            self.sent.lock().push(request.clone());
            Ok(())
        }

        fn receive(&mut self) -> Result<RtspMessage> {
            self.replies
                .lock()
                .pop_front()
                .ok_or(NetError::protocol(
                    ProtocolErrorKind::ConnectionClosed,
                ))
        }
    }

    impl Connector for Script {
        type Channel = Script;

        fn connect(&self, _url: &RtspUrl) -> Result<Script> {
            Ok(self.clone())
        }
    }

    const SDP: &str = "v=0\r\ns=x\r\n\
        m=audio 0 RTP/AVP 96\r\na=rtpmap:96 L16/48000/2\r\na=control:track1\r\n\
        m=application 0 RTP/AVP 107\r\n\
        m=video 0 RTP/AVP 26\r\na=control:rtsp://other/v\r\n";

    fn describe_reply() -> RtspMessage {
        RtspMessage::Response(RtspResponse::ok().with_body(SDP.to_string()))
    }

    fn session(script: &Script) -> ControlSession<Script> {
        ControlSession::new(script.clone(), SessionConfig::new("rtsp://cam:554/live")).unwrap()
    }

    #[test]
    fn ready_describes_and_sets_up_controlled_media() {
        let script = Script::default();
        script
            .reply(describe_reply())
            .reply(RtspMessage::Response(
                RtspResponse::ok()
                    .add_header("Session", "ABCD;timeout=60")
                    .add_header("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1"),
            ))
            .ok();

        let mut s = session(&script);
        s.change_state(StateChange::NullToReady).unwrap();
        assert_eq!(s.phase(), SessionPhase::Ready);
        assert_eq!(script.methods(), vec!["DESCRIBE", "SETUP", "SETUP"]);

        let sent = script.sent.lock();
        assert_eq!(sent[0].get_header("Accept"), Some("application/sdp"));
        assert_eq!(sent[1].uri, "rtsp://cam:554/live/track1");
        assert_eq!(
            sent[1].get_header("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=0-1")
        );
        assert_eq!(sent[2].uri, "rtsp://other/v");
        assert_eq!(
            sent[2].get_header("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=2-3")
        );
        assert_eq!(sent[2].get_header("Session"), Some("ABCD"));
        let cseqs: Vec<_> = sent.iter().map(|r| r.cseq().unwrap().to_string()).collect();
        assert_eq!(cseqs, vec!["1", "2", "3"]);
        drop(sent);

        assert_eq!(s.streams().len(), 2);
        assert_eq!(s.streams()[1].media_index, 2);
        assert_eq!(s.session_id(), Some("ABCD"));
    }

    #[test]
    fn error_status_halts_setup() {
        let script = Script::default();
        script
            .reply(describe_reply())
            .reply(RtspMessage::Response(RtspResponse::new(461, "Unsupported Transport")))
            .ok();

        let mut s = session(&script);
        match s.change_state(StateChange::NullToReady) {
            Err(NetError::Protocol {
                kind: ProtocolErrorKind::ErrorStatus { method, code, .. },
            }) => {
                assert_eq!(method, "SETUP");
                assert_eq!(code, 461);
            }
            other => panic!("expected error status, got {other:?}"),
        }
        assert_eq!(script.methods(), vec!["DESCRIBE", "SETUP"]);
        assert_eq!(s.phase(), SessionPhase::Describing);
        assert!(s.change_state(StateChange::ReadyToPaused).is_err());
        assert_eq!(script.methods().len(), 2);
    }

    #[test]
    fn full_lifecycle() {
        let script = Script::default();
        script.reply(describe_reply()).ok().ok();
        let mut s = session(&script);
        s.change_state(StateChange::NullToReady).unwrap();

        script.ok().ok().ok();
        s.change_state(StateChange::ReadyToPaused).unwrap();
        s.change_state(StateChange::PausedToPlaying).unwrap();
        assert_eq!(s.phase(), SessionPhase::Playing);
        s.change_state(StateChange::PlayingToPaused).unwrap();
        s.change_state(StateChange::PausedToReady).unwrap();
        s.change_state(StateChange::ReadyToNull).unwrap();
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert_eq!(
            script.methods(),
            vec!["DESCRIBE", "SETUP", "SETUP", "PLAY", "PAUSE", "TEARDOWN"]
        );
    }

    #[test]
    fn invalid_transition_sends_nothing() {
        let script = Script::default();
        let mut s = session(&script);
        assert!(matches!(
            s.change_state(StateChange::PausedToPlaying),
            Err(NetError::InvalidTransition { .. })
        ));
        assert!(s.change_state(StateChange::ReadyToNull).is_err());
        assert!(script.methods().is_empty());
    }

    #[test]
    fn close_after_failed_open_skips_teardown() {
        let script = Script::default();
        script.reply(RtspMessage::Response(RtspResponse::not_found()));
        let mut s = session(&script);
        assert!(s.change_state(StateChange::NullToReady).is_err());
        s.change_state(StateChange::ReadyToNull).unwrap();
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert_eq!(script.methods(), vec!["DESCRIBE"]);
    }

    #[test]
    fn receive_packet_skips_rtcp() {
        let script = Script::default();
        script.reply(describe_reply()).ok().ok();
        let mut s = session(&script);
        s.change_state(StateChange::NullToReady).unwrap();
        assert!(matches!(s.receive_packet(), Err(NetError::NotActive)));

        let rtcp = InterleavedFrame {
            channel: 1,
            payload: vec![0x80, 200, 0, 6],
        };
        let rtp = InterleavedFrame {
            channel: 0,
            payload: vec![0x80, 96, 0, 1],
        };
        script
            .ok()
            .reply(RtspMessage::Data(rtcp))
            .reply(RtspMessage::Data(rtp.clone()));
        s.change_state(StateChange::ReadyToPaused).unwrap();
        s.change_state(StateChange::PausedToPlaying).unwrap();
        assert_eq!(s.receive_packet().unwrap(), rtp);
    }
}
