//! Captive-portal DNS responder.
//!
//! Every well-formed query is answered with a single A record pointing at the
//! access point, whatever name or type was asked for. Clients then open the
//! portal page when they check for connectivity.
//!
//! Only the first question is answered. A query carrying several questions
//! gets a reply with QDCOUNT 1 that echoes the first question and drops the
//! rest, along with any authority or additional records. Stub resolvers send
//! one question per packet, so nothing in practice depends on the others.

use crate::error::ProtocolError;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const HEADER_LEN: usize = 12;
/// Classic UDP DNS limit; the response buffer never grows past it.
pub const MAX_PACKET_LEN: usize = 512;
/// Bytes appended to the echoed request: pointer, type, class, ttl, rdlength, rdata.
const ANSWER_LEN: usize = 2 + 2 + 2 + 4 + 2 + 4;
const ANSWER_TTL: u32 = 30;
const MAX_LABEL_LEN: usize = 63;

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// Builds the captive answer for `query`.
///
/// The response echoes the header and the first question of the request, so
/// anything after the question (extra questions, EDNS records) is dropped.
pub fn build_response(query: &[u8], answer_ip: Ipv4Addr) -> Result<Vec<u8>, ProtocolError> {
    if query.len() < HEADER_LEN {
        return Err(ProtocolError::MalformedRequest("shorter than header"));
    }
    if query.len() + ANSWER_LEN > MAX_PACKET_LEN {
        return Err(ProtocolError::BufferOverflow {
            limit: MAX_PACKET_LEN,
        });
    }
    if query[2] & 0x80 != 0 {
        return Err(ProtocolError::MalformedRequest("not a query"));
    }
    if u16::from_be_bytes([query[4], query[5]]) == 0 {
        return Err(ProtocolError::MalformedRequest("no question"));
    }

    let question_end = question_end(query)?;

    let mut resp = Vec::with_capacity(question_end + ANSWER_LEN);
    resp.extend_from_slice(&query[0..2]); // ID
    resp.extend_from_slice(&[0x81, 0x80]); // QR, RD, RA, NOERROR
    resp.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    resp.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    resp.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    resp.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    resp.extend_from_slice(&query[HEADER_LEN..question_end]);

    resp.extend_from_slice(&[0xC0, 0x0C]); // name → offset 12
    resp.extend_from_slice(&TYPE_A.to_be_bytes());
    resp.extend_from_slice(&CLASS_IN.to_be_bytes());
    resp.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    resp.extend_from_slice(&4u16.to_be_bytes());
    resp.extend_from_slice(&answer_ip.octets());

    Ok(resp)
}

/// Offset just past QTYPE/QCLASS of the first question.
fn question_end(query: &[u8]) -> Result<usize, ProtocolError> {
    let mut pos = HEADER_LEN;
    loop {
        let len = *query
            .get(pos)
            .ok_or(ProtocolError::MalformedRequest("name runs past packet"))? as usize;
        if len & 0xC0 != 0 {
            // 问题段中不接受压缩指针
            return Err(ProtocolError::MalformedRequest("compressed name in question"));
        }
        pos += 1;
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            return Err(ProtocolError::MalformedRequest("label too long"));
        }
        pos += len;
    }

    let end = pos + 4;
    if end > query.len() {
        return Err(ProtocolError::MalformedRequest("question truncated"));
    }
    Ok(end)
}

/// A running responder task. Dropping it without `stop()` leaves the task
/// running until the runtime shuts down.
pub struct DnsResponder {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl DnsResponder {
    /// Binds `bind_addr` and starts answering with `answer_ip`.
    /// A bind failure is returned once; nothing is retried.
    pub async fn start(bind_addr: SocketAddr, answer_ip: Ipv4Addr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!(%local_addr, %answer_ip, "DNS responder started");
        let handle = tokio::spawn(serve(socket, answer_ip, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals the task and waits until it has released the socket.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!("DNS responder task ended abnormally: {}", e);
        }
        tracing::info!("DNS responder stopped");
    }
}

async fn serve(socket: UdpSocket, answer_ip: Ipv4Addr, mut shutdown_rx: oneshot::Receiver<()>) {
    let mut buf = [0u8; MAX_PACKET_LEN];

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            res = socket.recv_from(&mut buf) => {
                let (len, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("DNS recv error: {}", e);
                        continue;
                    }
                };

                match build_response(&buf[..len], answer_ip) {
                    Ok(resp) => {
                        if let Err(e) = socket.send_to(&resp, peer).await {
                            tracing::warn!(%peer, "DNS send error: {}", e);
                        }
                    }
                    Err(e) => tracing::trace!(%peer, "Ignoring DNS packet: {}", e),
                }
            }
        }
    }
}
