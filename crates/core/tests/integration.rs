//! End-to-end tests over loopback sockets.
//!
//! A scripted RTSP server thread drives a `ControlSession` through its
//! whole lifecycle, and an L16 stream is carried through a
//! `DatagramSource`.

use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use medianet::media::l16::{AudioFormat, L16Depacketizer, L16Packetizer, PayloadTypeMap};
use medianet::error::ProtocolErrorKind;
use medianet::transport::{bind_any, send_any};
use medianet::{
    Address, AddressPort, ControlSession, Depacketizer, MediaBuffer, NetError, Packetizer,
    SessionConfig, SessionPhase, SourceConfig, StateChange, Unit,
};

const SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=loopback\r\n\
t=0 0\r\n\
m=audio 0 RTP/AVP 10\r\n\
a=rtpmap:10 L16/44100/2\r\n\
a=control:trackID=0\r\n";

/// Read one request head; `None` once the client hung up.
fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim_end().to_string();
        if line.is_empty() {
            if lines.is_empty() {
                continue;
            }
            return Some(lines);
        }
        lines.push(line);
    }
}

fn header<'a>(request: &'a [String], name: &str) -> Option<&'a str> {
    request.iter().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

fn frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![b'$', channel];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Answers every request with 200 OK. Returns the request heads it saw.
fn serve(listener: TcpListener) -> Vec<Vec<String>> {
    let (stream, _) = listener.accept().unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut seen = Vec::new();

    while let Some(request) = read_request(&mut reader) {
        let method = request[0].split(' ').next().unwrap_or_default().to_string();
        let cseq = header(&request, "CSeq").unwrap_or("0").to_string();

        let mut reply = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n");
        match method.as_str() {
            "DESCRIBE" => {
                reply.push_str("Content-Type: application/sdp\r\n");
                reply.push_str(&format!("Content-Length: {}\r\n\r\n{SDP}", SDP.len()));
            }
            "SETUP" => {
                let transport = header(&request, "Transport").unwrap_or_default();
                reply.push_str("Session: 4F2A19;timeout=60\r\n");
                reply.push_str(&format!("Transport: {transport};ssrc=0000BEEF\r\n\r\n"));
            }
            _ => reply.push_str("Session: 4F2A19\r\n\r\n"),
        }
        writer.write_all(reply.as_bytes()).unwrap();

        if method == "PLAY" {
            // RTCP first; the client must skip it.
            writer.write_all(&frame(1, &[0x80, 200, 0, 6])).unwrap();
            writer.write_all(&frame(0, &[0x80, 10, 0, 1, 1, 2, 3, 4])).unwrap();
        }

        let done = method == "TEARDOWN";
        seen.push(request);
        if done {
            break;
        }
    }
    seen
}

#[test]
fn rtsp_session_lifecycle_over_tcp() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || serve(listener));

    let url = format!("rtsp://127.0.0.1:{port}/live");
    let mut session = ControlSession::tcp(SessionConfig::new(&url)).unwrap();
    assert_eq!(session.phase(), SessionPhase::Closed);

    session.change_state(StateChange::NullToReady).unwrap();
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert_eq!(session.session_id(), Some("4F2A19"));
    assert_eq!(session.streams().len(), 1);
    let stream = &session.streams()[0];
    assert_eq!(stream.uri, format!("{url}/trackID=0"));
    assert_eq!(stream.transport.rtp_channel, 0);
    assert_eq!(stream.transport.ssrc, Some(0xBEEF));

    session.change_state(StateChange::ReadyToPaused).unwrap();
    session.change_state(StateChange::PausedToPlaying).unwrap();
    assert_eq!(session.phase(), SessionPhase::Playing);

    let packet = session.receive_packet().unwrap();
    assert_eq!(packet.channel, 0);
    assert_eq!(packet.payload, vec![0x80, 10, 0, 1, 1, 2, 3, 4]);

    session.change_state(StateChange::PlayingToPaused).unwrap();
    session.change_state(StateChange::PausedToReady).unwrap();
    session.change_state(StateChange::ReadyToNull).unwrap();
    assert_eq!(session.phase(), SessionPhase::Closed);

    let seen = server.join().unwrap();
    let methods: Vec<&str> = seen
        .iter()
        .map(|r| r[0].split(' ').next().unwrap())
        .collect();
    assert_eq!(methods, ["DESCRIBE", "SETUP", "PLAY", "PAUSE", "TEARDOWN"]);

    let cseqs: Vec<&str> = seen.iter().map(|r| header(r, "CSeq").unwrap()).collect();
    assert_eq!(cseqs, ["1", "2", "3", "4", "5"]);

    assert_eq!(header(&seen[0], "Session"), None);
    assert_eq!(
        header(&seen[1], "Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
    assert!(seen[1][0].starts_with(&format!("SETUP {url}/trackID=0 RTSP/1.0")));
    for request in &seen[2..] {
        assert_eq!(header(request, "Session"), Some("4F2A19"));
    }
}

#[test]
fn rtsp_error_status_stops_session() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let request = read_request(&mut reader).unwrap();
        let cseq = header(&request, "CSeq").unwrap().to_string();
        writer
            .write_all(format!("RTSP/1.0 404 Not Found\r\nCSeq: {cseq}\r\n\r\n").as_bytes())
            .unwrap();
        // No further request arrives before the client disconnects.
        read_request(&mut reader).is_none()
    });

    let url = format!("rtsp://127.0.0.1:{port}/missing");
    let mut session = ControlSession::tcp(SessionConfig::new(&url)).unwrap();
    let err = session.change_state(StateChange::NullToReady).unwrap_err();
    assert!(
        matches!(
            err,
            NetError::Protocol {
                kind: ProtocolErrorKind::ErrorStatus { code: 404, .. }
            }
        ),
        "{err}"
    );
    assert_ne!(session.phase(), SessionPhase::Ready);

    session.change_state(StateChange::ReadyToNull).unwrap();
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(server.join().unwrap());
}

#[test]
fn l16_over_datagram_source() {
    let mut source = medianet::DatagramSource::new(SourceConfig {
        local_address: Address::Ipv4(Ipv4Addr::LOCALHOST),
        authorized_senders: vec![Address::Ipv4(Ipv4Addr::LOCALHOST)],
        include_sender: true,
        ..SourceConfig::default()
    })
    .unwrap();
    source.activate().unwrap();
    let data_port = source.local_data_addr().unwrap().port();

    let format = AudioFormat::new(44100, 2);
    let mut packetizer = L16Packetizer::new(format, PayloadTypeMap::new()).unwrap();
    packetizer.set_mtu(12 + 400).unwrap();
    let samples: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let packets = packetizer.packetize(&MediaBuffer::new(samples.clone())).unwrap();
    assert_eq!(packets.len(), 3);

    let sender = bind_any(&Address::Ipv4(Ipv4Addr::LOCALHOST).resolve().unwrap(), 0).unwrap();
    let sender_port = sender.local_addr().unwrap().port();
    let remote = AddressPort::new(Address::Ipv4(Ipv4Addr::LOCALHOST), data_port)
        .resolve()
        .unwrap();
    for packet in &packets {
        send_any(&sender, &remote, packet).unwrap();
    }

    assert_eq!(source.next_unit().unwrap(), Unit::Discontinuity);

    let mut depacketizer = L16Depacketizer::new(PayloadTypeMap::new());
    let mut received = Vec::new();
    let mut pts = Vec::new();
    while received.len() < samples.len() {
        match source.next_unit().unwrap() {
            Unit::Data(datagram) => {
                assert_eq!(datagram.sender.map(|s| s.port()), Some(sender_port));
                let out = depacketizer.depacketize(&datagram.payload).unwrap();
                pts.push(out.buffer.pts.unwrap());
                received.extend_from_slice(&out.buffer.data);
            }
            other => panic!("unexpected unit {other:?}"),
        }
    }

    assert_eq!(received, samples);
    // 400 bytes per packet is 100 stereo frames.
    assert_eq!(pts[0], Duration::ZERO);
    assert_eq!(pts[1], Duration::from_nanos(100 * 1_000_000_000 / 44100));
    source.deactivate();
}

#[test]
fn cancel_interrupts_blocked_receive() {
    let mut source = medianet::DatagramSource::new(SourceConfig {
        local_address: Address::Ipv4(Ipv4Addr::LOCALHOST),
        authorized_senders: vec![Address::Ipv4(Ipv4Addr::LOCALHOST)],
        ..SourceConfig::default()
    })
    .unwrap();
    source.activate().unwrap();
    let canceller = source.canceller();

    let worker = thread::spawn(move || source.next_unit().unwrap());
    thread::sleep(Duration::from_millis(50));
    canceller.cancel().unwrap();

    assert_eq!(worker.join().unwrap(), Unit::Canceled);
}
