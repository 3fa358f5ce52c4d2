use std::{collections::VecDeque, io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::{timeout, Instant},
};
use tracing::{debug, info, warn};

use super::{
    error::{DecodeError, MqttError},
    packet::{decode_remaining_length, Connect, Packet, Publish, QoS, Subscribe},
};

pub const SUBACK_FAILURE: u8 = 0x80;
// Largest inbound packet body accepted. Control payloads are capped at 512
// bytes, so this leaves room for the topic and header fields.
pub const MAX_INBOUND_BODY: usize = 4096;

#[allow(async_fn_in_trait)]
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    async fn open(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn open(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
}

impl MqttOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive_secs: 60,
            clean_session: true,
            connect_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    PubAck,
    SubAck,
}

#[derive(Debug, Clone, Copy)]
struct PendingAck {
    packet_id: u16,
    kind: AckKind,
}

pub struct MqttClient<C: Connector> {
    connector: C,
    options: MqttOptions,
    state: SessionState,
    stream: Option<C::Stream>,
    next_packet_id: u16,
    pending_ack: Option<PendingAck>,
    inbound: VecDeque<Publish>,
    last_sent: Instant,
}

impl<C: Connector> MqttClient<C> {
    pub fn new(connector: C, options: MqttOptions) -> Self {
        Self {
            connector,
            options,
            state: SessionState::Disconnected,
            stream: None,
            next_packet_id: 1,
            pending_ack: None,
            inbound: VecDeque::new(),
            last_sent: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn outstanding_ack(&self) -> Option<u16> {
        self.pending_ack.map(|pending| pending.packet_id)
    }

    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), MqttError> {
        if self.stream.is_some() {
            self.disconnect().await;
        }

        self.state = SessionState::Connecting;
        // The whole handshake, transport open through CONNACK, shares one deadline.
        let bound = self.options.connect_timeout;
        let outcome = timeout(bound, self.establish(host, port))
            .await
            .unwrap_or(Err(MqttError::Timeout));
        match outcome {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!(
                    "mqtt session established with {host}:{port} as `{}`",
                    self.options.client_id
                );
                Ok(())
            }
            Err(err) => {
                self.teardown();
                Err(err)
            }
        }
    }

    async fn establish(&mut self, host: &str, port: u16) -> Result<(), MqttError> {
        let stream = self.connector.open(host, port).await?;
        self.stream = Some(stream);
        self.next_packet_id = 1;
        self.pending_ack = None;
        self.inbound.clear();

        let connect = Packet::Connect(Connect {
            client_id: self.options.client_id.clone(),
            keep_alive_secs: self.options.keep_alive_secs,
            clean_session: self.options.clean_session,
        });
        self.send(&connect).await?;

        match self.next_packet(self.options.connect_timeout).await? {
            Some(Packet::ConnAck { return_code: 0, .. }) => Ok(()),
            Some(Packet::ConnAck { return_code, .. }) => {
                warn!("broker refused connection with code {return_code}");
                Err(MqttError::Rejected(return_code))
            }
            Some(other) => Err(DecodeError::UnexpectedPacket(other.packet_type()).into()),
            None => Err(MqttError::Timeout),
        }
    }

    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.ensure_connected()?;
        if let Some(pending) = self.pending_ack {
            return Err(MqttError::Outstanding(pending.packet_id));
        }

        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.allocate_packet_id()),
        };
        let packet = Packet::Publish(Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
            dup: false,
            packet_id,
        });
        self.send(&packet).await?;

        match packet_id {
            Some(packet_id) => self.await_ack(packet_id, AckKind::PubAck).await,
            None => Ok(()),
        }
    }

    pub async fn subscribe(&mut self, filters: &[(&str, QoS)]) -> Result<(), MqttError> {
        self.ensure_connected()?;
        if let Some(pending) = self.pending_ack {
            return Err(MqttError::Outstanding(pending.packet_id));
        }

        let packet_id = self.allocate_packet_id();
        let packet = Packet::Subscribe(Subscribe {
            packet_id,
            filters: filters
                .iter()
                .map(|(filter, qos)| ((*filter).to_string(), *qos))
                .collect(),
        });
        self.send(&packet).await?;
        self.await_ack(packet_id, AckKind::SubAck).await
    }

    pub async fn poll(&mut self, wait: Duration) -> Result<Option<Publish>, MqttError> {
        self.ensure_connected()?;
        if let Some(publish) = self.inbound.pop_front() {
            return Ok(Some(publish));
        }

        self.maintain_keep_alive().await?;

        match self.next_packet(wait).await? {
            None | Some(Packet::PingResp) => Ok(None),
            Some(Packet::Publish(publish)) => {
                self.acknowledge_inbound(&publish).await?;
                Ok(Some(publish))
            }
            Some(Packet::PubAck { packet_id }) => {
                self.absorb_late_ack(packet_id, AckKind::PubAck);
                Ok(None)
            }
            Some(Packet::SubAck { packet_id, .. }) => {
                self.absorb_late_ack(packet_id, AckKind::SubAck);
                Ok(None)
            }
            Some(other) => Err(self.violation(other)),
        }
    }

    pub async fn disconnect(&mut self) {
        if self.stream.is_some() {
            if let Err(err) = self.send(&Packet::Disconnect).await {
                debug!("mqtt disconnect not delivered: {err}");
            }
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = timeout(self.options.ack_timeout, stream.shutdown()).await;
        }
        self.teardown();
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        if self.is_connected() && self.stream.is_some() {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn allocate_packet_id(&mut self) -> u16 {
        let packet_id = self.next_packet_id;
        self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        packet_id
    }

    async fn await_ack(&mut self, packet_id: u16, kind: AckKind) -> Result<(), MqttError> {
        self.pending_ack = Some(PendingAck { packet_id, kind });
        let deadline = Instant::now() + self.options.ack_timeout;

        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            if wait.is_zero() {
                warn!("no acknowledgement for packet {packet_id} within timeout");
                return Err(MqttError::Timeout);
            }

            let Some(packet) = self.next_packet(wait).await? else {
                continue;
            };

            match (kind, packet) {
                (AckKind::PubAck, Packet::PubAck { packet_id: acked }) if acked == packet_id => {
                    self.pending_ack = None;
                    return Ok(());
                }
                (
                    AckKind::SubAck,
                    Packet::SubAck {
                        packet_id: acked,
                        return_codes,
                    },
                ) if acked == packet_id => {
                    self.pending_ack = None;
                    if return_codes.contains(&SUBACK_FAILURE) {
                        return Err(MqttError::Rejected(SUBACK_FAILURE));
                    }
                    return Ok(());
                }
                (_, Packet::PubAck { packet_id: acked })
                | (_, Packet::SubAck { packet_id: acked, .. }) => {
                    debug!("ignoring acknowledgement for packet {acked} while waiting for {packet_id}");
                }
                (_, Packet::Publish(publish)) => {
                    self.acknowledge_inbound(&publish).await?;
                    self.inbound.push_back(publish);
                }
                (_, Packet::PingResp) => {}
                (_, other) => return Err(self.violation(other)),
            }
        }
    }

    fn absorb_late_ack(&mut self, packet_id: u16, kind: AckKind) {
        match self.pending_ack {
            Some(pending) if pending.packet_id == packet_id && pending.kind == kind => {
                debug!("late acknowledgement for packet {packet_id}");
                self.pending_ack = None;
            }
            _ => debug!("ignoring unsolicited acknowledgement for packet {packet_id}"),
        }
    }

    async fn acknowledge_inbound(&mut self, publish: &Publish) -> Result<(), MqttError> {
        if let Some(packet_id) = publish.packet_id {
            self.send(&Packet::PubAck { packet_id }).await?;
        }
        Ok(())
    }

    async fn maintain_keep_alive(&mut self) -> Result<(), MqttError> {
        if self.options.keep_alive_secs == 0 {
            return Ok(());
        }
        let interval = Duration::from_secs(u64::from(self.options.keep_alive_secs)) / 2;
        if self.last_sent.elapsed() >= interval {
            self.send(&Packet::PingReq).await?;
        }
        Ok(())
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), MqttError> {
        let bytes = packet.encode()?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(MqttError::NotConnected);
        };

        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        let result = match timeout(self.options.ack_timeout, write).await {
            Ok(result) => result.map_err(MqttError::from),
            Err(_) => Err(MqttError::Transport(io::ErrorKind::TimedOut.into())),
        };

        match result {
            Ok(()) => {
                self.last_sent = Instant::now();
                Ok(())
            }
            Err(err) => {
                self.teardown();
                Err(err)
            }
        }
    }

    // Only the header wait may end quietly; a started packet must complete.
    async fn next_packet(&mut self, wait: Duration) -> Result<Option<Packet>, MqttError> {
        let ack_timeout = self.options.ack_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(MqttError::NotConnected);
        };

        let mut header = [0u8; 1];
        let result = match timeout(wait, stream.read(&mut header)).await {
            Err(_) => return Ok(None),
            Ok(Ok(0)) => Err(MqttError::Transport(io::ErrorKind::UnexpectedEof.into())),
            Ok(Ok(_)) => match timeout(ack_timeout, read_packet_body(stream, header[0])).await {
                Ok(result) => result.map(Some),
                Err(_) => Err(MqttError::Transport(io::ErrorKind::TimedOut.into())),
            },
            Ok(Err(err)) => Err(err.into()),
        };

        if result.is_err() {
            self.teardown();
        }
        result
    }

    fn violation(&mut self, packet: Packet) -> MqttError {
        warn!("unexpected {:?} packet from broker", packet.packet_type());
        self.teardown();
        DecodeError::UnexpectedPacket(packet.packet_type()).into()
    }

    fn teardown(&mut self) {
        if self.state != SessionState::Disconnected {
            debug!("mqtt session closed");
        }
        self.state = SessionState::Disconnected;
        self.stream = None;
        self.pending_ack = None;
        self.inbound.clear();
    }
}

pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, MqttError> {
    let header = reader.read_u8().await?;
    read_packet_body(reader, header).await
}

async fn read_packet_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    header: u8,
) -> Result<Packet, MqttError> {
    let mut length_bytes = [0u8; 4];
    let mut used = 0;
    let remaining = loop {
        if used == length_bytes.len() {
            return Err(DecodeError::RemainingLength.into());
        }
        length_bytes[used] = reader.read_u8().await?;
        used += 1;
        if let Some((remaining, _)) = decode_remaining_length(&length_bytes[..used])? {
            break remaining;
        }
    };

    if remaining > MAX_INBOUND_BODY {
        return Err(DecodeError::BodyTooLarge(remaining).into());
    }
    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await?;
    Ok(Packet::decode(header, &body)?)
}
