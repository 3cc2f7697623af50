use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};

use crate::error::{NetError, ProtocolErrorKind, Result};
use crate::protocol::{InterleavedFrame, RtspMessage, RtspRequest, RtspResponse, RtspUrl};
use crate::session::{ControlChannel, Connector};
use crate::transport::socket::connect_any;

/// Longest response head accepted, status line and headers included.
const MAX_HEAD: u64 = 16 * 1024;
/// Largest response body accepted.
const MAX_BODY: usize = 1024 * 1024;

/// Blocking RTSP control connection.
///
/// Requests are written whole; reads return either a response (head plus
/// `Content-Length` body) or an interleaved `$` frame, whichever arrives
/// next on the stream.
pub struct RtspConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer_addr: SocketAddr,
}

impl RtspConnection {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(RtspConnection {
            reader,
            writer: stream,
            peer_addr,
        })
    }

    /// Resolve the URL's host and connect to the first reachable alternative.
    pub fn connect(url: &RtspUrl) -> Result<Self> {
        let remote = url.address_port().resolve()?;
        let stream = connect_any(&remote)?;
        stream.set_nodelay(true)?;
        let conn = Self::new(stream)?;
        tracing::info!(peer = %conn.peer_addr, url = %url, "control connection open");
        Ok(conn)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn read_frame(&mut self) -> Result<InterleavedFrame> {
        let mut head = [0u8; 4];
        self.reader.read_exact(&mut head).map_err(closed_on_eof)?;
        let len = u16::from_be_bytes([head[2], head[3]]) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).map_err(closed_on_eof)?;
        Ok(InterleavedFrame {
            channel: head[1],
            payload,
        })
    }

    fn read_response(&mut self) -> Result<RtspResponse> {
        let mut head = Vec::new();
        let mut limited = (&mut self.reader).take(MAX_HEAD);
        loop {
            let start = head.len();
            if limited.read_until(b'\n', &mut head)? == 0 {
                let kind = if limited.limit() == 0 {
                    ProtocolErrorKind::HeadTooLarge
                } else {
                    ProtocolErrorKind::ConnectionClosed
                };
                return Err(NetError::protocol(kind));
            }
            let line = &head[start..];
            if line == b"\r\n" || line == b"\n" {
                break;
            }
        }
        let head = String::from_utf8(head)
            .map_err(|_| NetError::protocol(ProtocolErrorKind::InvalidEncoding))?;

        let mut response = RtspResponse::parse(&head)?;
        let len = response.content_length()?;
        if len > MAX_BODY {
            tracing::warn!(peer = %self.peer_addr, len, "response body over limit");
            return Err(NetError::protocol(ProtocolErrorKind::InvalidContentLength));
        }
        if len > 0 {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body).map_err(closed_on_eof)?;
            response.body = Some(String::from_utf8_lossy(&body).into_owned());
        }
        Ok(response)
    }
}

impl ControlChannel for RtspConnection {
    fn send(&mut self, request: &RtspRequest) -> Result<()> {
        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            uri = %request.uri,
            cseq = request.cseq().unwrap_or("-"),
            "request"
        );
        self.writer.write_all(request.serialize().as_bytes())?;
        Ok(())
    }

    fn receive(&mut self) -> Result<RtspMessage> {
        loop {
            let first = match self.reader.fill_buf()?.first() {
                Some(b) => *b,
                None => return Err(NetError::protocol(ProtocolErrorKind::ConnectionClosed)),
            };
            match first {
                InterleavedFrame::MAGIC => return Ok(RtspMessage::Data(self.read_frame()?)),
                // Stray line endings between messages.
                b'\r' | b'\n' => self.reader.consume(1),
                _ => {
                    let response = self.read_response()?;
                    tracing::debug!(
                        peer = %self.peer_addr,
                        status = response.status_code,
                        "response"
                    );
                    return Ok(RtspMessage::Response(response));
                }
            }
        }
    }
}

fn closed_on_eof(e: std::io::Error) -> NetError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        NetError::protocol(ProtocolErrorKind::ConnectionClosed)
    } else {
        NetError::Io(e)
    }
}

/// Opens [`RtspConnection`]s over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Channel = RtspConnection;

    fn connect(&self, url: &RtspUrl) -> Result<RtspConnection> {
        RtspConnection::connect(url)
    }
}
