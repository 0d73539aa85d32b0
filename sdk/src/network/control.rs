use async_channel::{unbounded, Receiver, Sender};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, trace};
use voicebot_protocol::Packet;

use super::ControlLink;
use crate::error::VoiceError;

/// Timeout for establishing the TCP connection itself.
const CONNECT_TIMEOUT_SECS: u64 = 5;

const READ_BUFFER_SIZE: usize = 4096;

/// Connects to the endpoint's control port and spawns the socket handler.
pub(super) async fn connect(addr: &str) -> Result<ControlLink, VoiceError> {
    debug!("TCP connect to {}", addr);
    let socket = tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        TcpStream::connect(addr),
    )
    .await
    .map_err(|_| VoiceError::ConnectionLost(format!("connect to {addr} timed out")))?
    .map_err(|e| VoiceError::io(&format!("connect to {addr}"), &e))?;
    let _ = socket.set_nodelay(true);
    debug!("TCP connected to {}", addr);

    let (send_tx, send_rx) = unbounded();
    let (packet_tx, packet_rx) = unbounded();
    tokio::spawn(run_handler(socket, send_rx, packet_tx));
    Ok(ControlLink::new(send_tx, packet_rx))
}

/// Pumps packets between the socket and the link until either side closes.
async fn run_handler(mut socket: TcpStream, send_rx: Receiver<Packet>, packet_tx: Sender<Packet>) {
    let mut read_buf = [0u8; READ_BUFFER_SIZE];
    // Buffer to accumulate partial packets across reads
    let mut accumulator: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            outgoing = send_rx.recv() => {
                let Ok(packet) = outgoing else { break };
                if let Err(e) = write_packet(&mut socket, &packet).await {
                    error!("TCP handler error: {}", e);
                    break;
                }
            }

            read = socket.read(&mut read_buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        accumulator.extend_from_slice(&read_buf[..n]);
                        if let Err(e) = drain_packets(&mut accumulator, &packet_tx).await {
                            error!("TCP handler error: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    send_rx.close();
    packet_tx.close();
    debug!("TCP handler stopped");
}

async fn write_packet(socket: &mut TcpStream, packet: &Packet) -> Result<(), String> {
    let encoded = packet.encode().map_err(|e| format!("Encode error: {e}"))?;
    trace!("Sending {}", packet.name());
    socket
        .write_all(&encoded)
        .await
        .map_err(|e| format!("Write error: {e}"))
}

/// Forwards every complete packet in `accumulator`, keeping any partial tail.
async fn drain_packets(accumulator: &mut Vec<u8>, packet_tx: &Sender<Packet>) -> Result<(), String> {
    loop {
        match Packet::decode(accumulator) {
            Ok((packet, size)) => {
                trace!("Received {}", packet.name());
                accumulator.drain(..size);
                packet_tx
                    .send(packet)
                    .await
                    .map_err(|_| "Packet receiver closed".to_string())?;
            }
            Err(e) if e.is_incomplete() => return Ok(()),
            Err(e) => return Err(format!("Parse error: {e}")),
        }
    }
}
