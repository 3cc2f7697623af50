use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use medianet::media::l16::{AudioFormat, Endianness, L16Depacketizer, L16Packetizer, PayloadTypeMap};
use medianet::protocol::SessionDescription;
use medianet::transport::{bind_any, send_any};
use medianet::{
    Address, AddressPort, ControlSession, Depacketizer, MediaBuffer, Packetizer, SessionConfig,
    SourceConfig, StateChange, Unit,
};

#[derive(Parser)]
#[command(name = "medianet", about = "RTP/RTSP media transport tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive datagrams until Enter is pressed
    Receive {
        /// Local address to bind
        #[arg(long, default_value = "0.0.0.0")]
        local: Address,
        #[arg(long, default_value_t = 5004)]
        data_port: u16,
        #[arg(long, default_value_t = 5005)]
        control_port: u16,
        /// Authorized sender (repeatable)
        #[arg(long = "allow", required = true)]
        allow: Vec<Address>,
        /// Report the sender address of each datagram
        #[arg(long)]
        include_sender: bool,
        /// Decode data as L16 using these payload types (e.g. "96:48000/2")
        #[arg(long)]
        l16: Option<PayloadTypeMap>,
    },
    /// Send a raw 16-bit PCM file as L16 RTP
    SendL16 {
        /// Destination host:port
        #[arg(long)]
        dest: AddressPort,
        #[arg(long, default_value_t = 44100)]
        rate: u32,
        #[arg(long, default_value_t = 2)]
        channels: u16,
        /// Samples in the file are little-endian
        #[arg(long)]
        little_endian: bool,
        #[arg(long, default_value_t = 1400)]
        mtu: usize,
        /// Dynamic payload types (e.g. "96:48000/2")
        #[arg(long, default_value = "")]
        payload_types: PayloadTypeMap,
        file: PathBuf,
    },
    /// Play an RTSP presentation over interleaved TCP
    Play {
        url: String,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let result = match args.command {
        Command::Receive {
            local,
            data_port,
            control_port,
            allow,
            include_sender,
            l16,
        } => receive(
            SourceConfig {
                local_address: local,
                data_port,
                control_port,
                include_sender,
                authorized_senders: allow,
                ..Default::default()
            },
            l16,
        ),
        Command::SendL16 {
            dest,
            rate,
            channels,
            little_endian,
            mtu,
            payload_types,
            file,
        } => {
            let endianness = if little_endian {
                Endianness::Little
            } else {
                Endianness::Big
            };
            send_l16(
                dest,
                AudioFormat::new(rate, channels).with_endianness(endianness),
                mtu,
                payload_types,
                file,
            )
        }
        Command::Play { url, seconds } => play(&url, Duration::from_secs(seconds)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn receive(config: SourceConfig, l16: Option<PayloadTypeMap>) -> medianet::Result<()> {
    let mut source = medianet::DatagramSource::new(config)?;
    source.activate()?;
    let canceller = source.canceller();

    println!(
        "receiving data on {:?}, control on {:?}, press Enter to stop",
        source.local_data_addr(),
        source.local_control_addr()
    );

    let worker = thread::spawn(move || -> medianet::Result<()> {
        let mut depacketizer = l16.map(L16Depacketizer::new);
        loop {
            match source.next_unit()? {
                Unit::Canceled => break,
                Unit::Discontinuity => {
                    tracing::info!("discontinuity");
                    if let Some(d) = depacketizer.as_mut() {
                        d.reset();
                    }
                }
                Unit::Data(datagram) => match depacketizer.as_mut() {
                    Some(d) => match d.depacketize(&datagram.payload) {
                        Ok(out) => {
                            if let Some(change) = out.format_change {
                                tracing::info!(?change, "format change");
                            }
                            tracing::info!(
                                bytes = out.buffer.data.len(),
                                pts = ?out.buffer.pts,
                                sender = ?datagram.sender,
                                "audio"
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "dropping packet"),
                    },
                    None => tracing::info!(
                        bytes = datagram.payload.len(),
                        sender = ?datagram.sender,
                        "data"
                    ),
                },
                Unit::Control(datagram) => tracing::info!(
                    bytes = datagram.payload.len(),
                    sender = ?datagram.sender,
                    "control"
                ),
            }
        }
        source.deactivate();
        Ok(())
    });

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    canceller.cancel()?;

    match worker.join() {
        Ok(result) => result,
        Err(_) => Err(io::Error::other("receive thread panicked").into()),
    }
}

fn send_l16(
    dest: AddressPort,
    format: AudioFormat,
    mtu: usize,
    payload_types: PayloadTypeMap,
    file: PathBuf,
) -> medianet::Result<()> {
    let samples = std::fs::read(&file)?;
    let mut packetizer = L16Packetizer::new(format, payload_types)?;
    packetizer.set_mtu(mtu)?;

    let remote = dest.resolve()?;

    let mut sdp = SessionDescription::new("medianet L16");
    sdp.connection = Some(SessionDescription::connection_for(remote.address.primary()));
    sdp.media.push(packetizer.media_description("audio", dest.port));
    print!("{}", sdp);

    let socket = bind_any(&remote.address.wildcard(), 0)?;

    let frame_time = Duration::from_secs(1) / format.rate;
    let start = Instant::now();
    let mut sent_frames: u32 = 0;
    for packet in packetizer.packetize(&MediaBuffer::new(samples))? {
        // Pace to real time.
        let due = frame_time * sent_frames;
        if let Some(wait) = due.checked_sub(start.elapsed()) {
            thread::sleep(wait);
        }
        send_any(&socket, &remote, &packet)?;
        sent_frames += ((packet.len() - 12) / format.frame_size()) as u32;
    }
    tracing::info!(frames = sent_frames, "done");
    Ok(())
}

fn play(url: &str, duration: Duration) -> medianet::Result<()> {
    let mut session = ControlSession::tcp(SessionConfig::new(url))?;
    session.change_state(StateChange::NullToReady)?;
    for stream in session.streams() {
        println!("{} -> {}", stream.uri, stream.transport);
    }

    session.change_state(StateChange::ReadyToPaused)?;
    session.change_state(StateChange::PausedToPlaying)?;

    let deadline = Instant::now() + duration;
    let mut packets = 0u64;
    while Instant::now() < deadline {
        let frame = session.receive_packet()?;
        packets += 1;
        tracing::debug!(channel = frame.channel, bytes = frame.payload.len(), "rtp");
    }
    println!("received {} packets", packets);

    session.change_state(StateChange::PlayingToPaused)?;
    session.change_state(StateChange::PausedToReady)?;
    session.change_state(StateChange::ReadyToNull)
}
