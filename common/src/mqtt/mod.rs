pub mod client;
pub mod error;
pub mod packet;

pub use client::{Connector, MqttClient, MqttOptions, SessionState, TcpConnector};
pub use error::{DecodeError, EncodeError, MqttError};
pub use packet::{Packet, PacketType, Publish, QoS};

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::VecDeque,
        io,
        sync::{Arc, Mutex},
    };

    use tokio::{
        io::{duplex, AsyncWriteExt, DuplexStream},
        sync::mpsc,
    };

    use super::{
        client::{read_packet, Connector},
        packet::{Connect, Packet, Publish, QoS, Subscribe},
    };

    const PIPE_CAPACITY: usize = 64 * 1024;

    #[derive(Clone, Default)]
    pub struct DuplexConnector {
        streams: Arc<Mutex<VecDeque<DuplexStream>>>,
    }

    impl DuplexConnector {
        pub fn empty() -> Self {
            Self::default()
        }

        pub fn pair() -> (Self, BrokerEnd) {
            let connector = Self::empty();
            let broker = connector.attach();
            (connector, broker)
        }

        pub fn attach(&self) -> BrokerEnd {
            let (client, broker) = duplex(PIPE_CAPACITY);
            self.streams.lock().unwrap().push_back(client);
            BrokerEnd { stream: broker }
        }

        pub fn attach_auto(&self) -> AutoBroker {
            AutoBroker::spawn(self.attach())
        }
    }

    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn open(&self, _host: &str, _port: u16) -> io::Result<DuplexStream> {
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::ErrorKind::ConnectionRefused.into())
        }
    }

    pub struct BrokerEnd {
        stream: DuplexStream,
    }

    impl BrokerEnd {
        pub async fn expect(&mut self) -> Packet {
            read_packet(&mut self.stream).await.unwrap()
        }

        pub async fn expect_connect(&mut self) -> Connect {
            match self.expect().await {
                Packet::Connect(connect) => connect,
                other => panic!("expected CONNECT, got {other:?}"),
            }
        }

        pub async fn expect_publish(&mut self) -> Publish {
            match self.expect().await {
                Packet::Publish(publish) => publish,
                other => panic!("expected PUBLISH, got {other:?}"),
            }
        }

        pub async fn expect_subscribe(&mut self) -> Subscribe {
            match self.expect().await {
                Packet::Subscribe(subscribe) => subscribe,
                other => panic!("expected SUBSCRIBE, got {other:?}"),
            }
        }

        pub async fn send(&mut self, packet: Packet) {
            self.send_raw(&packet.encode().unwrap()).await;
        }

        pub async fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.unwrap();
        }
    }

    pub struct AutoBroker {
        published: Arc<Mutex<Vec<Publish>>>,
        subscriptions: Arc<Mutex<Vec<String>>>,
        outbound: mpsc::UnboundedSender<Packet>,
        next_packet_id: u16,
    }

    impl AutoBroker {
        fn spawn(end: BrokerEnd) -> Self {
            let (mut reader, mut writer) = tokio::io::split(end.stream);
            let (outbound, mut queued) = mpsc::unbounded_channel::<Packet>();
            let published = Arc::new(Mutex::new(Vec::new()));
            let subscriptions = Arc::new(Mutex::new(Vec::new()));

            tokio::spawn(async move {
                while let Some(packet) = queued.recv().await {
                    let Ok(bytes) = packet.encode() else { break };
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            });

            let replies = outbound.clone();
            let record = Arc::clone(&published);
            let subscribed = Arc::clone(&subscriptions);
            tokio::spawn(async move {
                while let Ok(packet) = read_packet(&mut reader).await {
                    let reply = match packet {
                        Packet::Connect(_) => Some(Packet::ConnAck {
                            session_present: false,
                            return_code: 0,
                        }),
                        Packet::Publish(publish) => {
                            let ack = publish
                                .packet_id
                                .map(|packet_id| Packet::PubAck { packet_id });
                            record.lock().unwrap().push(publish);
                            ack
                        }
                        Packet::Subscribe(subscribe) => {
                            let return_codes = subscribe
                                .filters
                                .iter()
                                .map(|(_, qos)| *qos as u8)
                                .collect();
                            subscribed
                                .lock()
                                .unwrap()
                                .extend(subscribe.filters.into_iter().map(|(filter, _)| filter));
                            Some(Packet::SubAck {
                                packet_id: subscribe.packet_id,
                                return_codes,
                            })
                        }
                        Packet::PingReq => Some(Packet::PingResp),
                        Packet::Disconnect => break,
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        if replies.send(reply).is_err() {
                            break;
                        }
                    }
                }
            });

            Self {
                published,
                subscriptions,
                outbound,
                next_packet_id: 1,
            }
        }

        pub fn inject(&mut self, topic: &str, payload: &[u8]) {
            let packet_id = self.next_packet_id;
            self.next_packet_id += 1;
            let _ = self.outbound.send(Packet::Publish(Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos: QoS::AtLeastOnce,
                retain: false,
                dup: false,
                packet_id: Some(packet_id),
            }));
        }

        pub fn published(&self) -> Vec<Publish> {
            self.published.lock().unwrap().clone()
        }

        pub fn payloads(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|publish| publish.topic == topic)
                .map(|publish| String::from_utf8_lossy(&publish.payload).into_owned())
                .collect()
        }

        pub fn last_payload(&self, topic: &str) -> Option<String> {
            self.payloads(topic).pop()
        }

        pub fn subscriptions(&self) -> Vec<String> {
            self.subscriptions.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.published.lock().unwrap().clear();
        }
    }
}
