//! Meshtastic radio adapter.
//!
//! Talks the protobuf stream protocol over a serial port. [`RadioLink`] holds everything
//! learned from the device (own node number, node directory, config sync state) and fans
//! decoded packets out to a single subscriber. [`MeshtasticDevice`] owns the port: a reader
//! thread feeds [`RadioLink::handle_frame`], and writes go through a mutex so the outbound
//! queue and the heartbeat never interleave frames.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use meshbridge::config::MeshtasticConfig;
//! use meshbridge::meshtastic::MeshtasticDevice;
//! use meshbridge::relay::NodeDirectory;
//!
//! let device = MeshtasticDevice::connect(&MeshtasticConfig::default(), NodeDirectory::new()).await?;
//! let mut packets = device.subscribe();
//! while let Some(pkt) = packets.recv().await {
//!     println!("{:?}", pkt.text());
//! }
//! # Ok(())
//! # }
//! ```
use anyhow::{anyhow, Result};
use log::{debug, info, trace, warn};
use prost::Message;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod framer;
pub mod proto;

use crate::logutil::{escape_log, hex_snippet};
use crate::relay::labels::node_id_from_num;
use crate::relay::mesh_inbound::{DecodedPayload, MeshPacket};
use crate::relay::{NodeDirectory, NodeEntry};

#[cfg(feature = "serial")]
pub use device::MeshtasticDevice;

pub const BROADCAST_ADDR: u32 = 0xffff_ffff;
pub const DEFAULT_HOP_LIMIT: u32 = 3;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

fn non_zero(v: u32) -> Option<u32> {
    (v != 0).then_some(v)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Names from a `User` record; empty strings count as absent.
pub fn entry_from_user(user: &proto::User) -> NodeEntry {
    NodeEntry {
        short_name: non_empty(&user.short_name),
        long_name: non_empty(&user.long_name),
    }
}

/// Convert a radio packet to the relay's view.
///
/// Zero-valued numeric fields are indistinguishable from unset in the wire format and are
/// reported as absent. Only text-message payloads carry `text`.
pub fn to_relay_packet(pkt: &proto::MeshPacket) -> MeshPacket {
    let decoded = match &pkt.payload_variant {
        Some(proto::mesh_packet::PayloadVariant::Decoded(data)) => {
            let text = (data.portnum == proto::PortNum::TextMessageApp as i32)
                .then(|| String::from_utf8_lossy(&data.payload).into_owned());
            Some(DecodedPayload { text })
        }
        _ => None,
    };
    let from = non_zero(pkt.from);
    MeshPacket {
        from_id: from.map(node_id_from_num),
        from,
        channel: non_zero(pkt.channel),
        hop_start: non_zero(pkt.hop_start),
        hop_limit: non_zero(pkt.hop_limit),
        decoded,
    }
}

/// Encode a broadcast text message on `channel` as a framed `ToRadio`.
pub fn encode_text_packet(text: &str, channel: u32) -> Result<Vec<u8>> {
    let data = proto::Data {
        portnum: proto::PortNum::TextMessageApp as i32,
        payload: text.as_bytes().to_vec(),
        ..Default::default()
    };
    let pkt = proto::MeshPacket {
        to: BROADCAST_ADDR,
        channel,
        id: packet_id(),
        hop_limit: DEFAULT_HOP_LIMIT,
        payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(data)),
        ..Default::default()
    };
    encode_to_radio(proto::to_radio::PayloadVariant::Packet(pkt))
}

pub fn encode_want_config(id: u32) -> Result<Vec<u8>> {
    encode_to_radio(proto::to_radio::PayloadVariant::WantConfigId(id))
}

pub fn encode_heartbeat() -> Result<Vec<u8>> {
    encode_to_radio(proto::to_radio::PayloadVariant::Heartbeat(proto::Heartbeat {}))
}

fn encode_to_radio(variant: proto::to_radio::PayloadVariant) -> Result<Vec<u8>> {
    let msg = proto::ToRadio {
        payload_variant: Some(variant),
    };
    framer::encode_frame(&msg.encode_to_vec())
}

fn packet_id() -> u32 {
    loop {
        let id: u32 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// State learned from the radio, shared between the reader thread and the rest of the bridge.
#[derive(Debug, Default)]
pub struct RadioLink {
    directory: NodeDirectory,
    my_node_num: AtomicU32,
    config_id: AtomicU32,
    config_complete: AtomicBool,
    subscriber: Mutex<Option<mpsc::UnboundedSender<MeshPacket>>>,
}

impl RadioLink {
    pub fn new(directory: NodeDirectory) -> Self {
        Self {
            directory,
            ..Default::default()
        }
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    /// Install the packet subscriber, replacing any previous one. Packets that arrive with
    /// no subscriber installed are dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MeshPacket> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    /// Drop the subscriber so its receiver sees end-of-stream.
    pub fn close(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn own_node_num(&self) -> Option<u32> {
        non_zero(self.my_node_num.load(Ordering::SeqCst))
    }

    /// `!xxxxxxxx` id of the attached radio, once reported
    pub fn own_node_id(&self) -> Option<String> {
        self.own_node_num().map(node_id_from_num)
    }

    /// Start a config sync and return the nonce to send in `want_config_id`.
    pub fn begin_config(&self) -> u32 {
        let id = packet_id();
        self.config_id.store(id, Ordering::SeqCst);
        self.config_complete.store(false, Ordering::SeqCst);
        id
    }

    pub fn is_config_complete(&self) -> bool {
        self.config_complete.load(Ordering::SeqCst)
    }

    /// Decode and apply one `FromRadio` payload.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<()> {
        let msg = proto::FromRadio::decode(frame)
            .map_err(|e| anyhow!("undecodable FromRadio ({}): {}", hex_snippet(frame, 16), e))?;
        self.apply(msg);
        Ok(())
    }

    fn apply(&self, msg: proto::FromRadio) {
        use proto::from_radio::PayloadVariant;
        match msg.payload_variant {
            Some(PayloadVariant::MyInfo(info)) => {
                self.my_node_num.store(info.my_node_num, Ordering::SeqCst);
                debug!("Radio reports own node {}", node_id_from_num(info.my_node_num));
            }
            Some(PayloadVariant::NodeInfo(node)) => {
                if let Some(user) = &node.user {
                    self.directory
                        .upsert(node_id_from_num(node.num), entry_from_user(user));
                }
            }
            Some(PayloadVariant::ConfigCompleteId(id)) => {
                if id == self.config_id.load(Ordering::SeqCst) {
                    self.config_complete.store(true, Ordering::SeqCst);
                    debug!("Config sync complete ({} nodes)", self.directory.len());
                } else {
                    trace!("Ignoring config_complete_id 0x{:08x}", id);
                }
            }
            Some(PayloadVariant::Packet(pkt)) => self.on_packet(pkt),
            None => trace!("FromRadio id={} with no payload we track", msg.id),
        }
    }

    fn on_packet(&self, pkt: proto::MeshPacket) {
        if let Some(proto::mesh_packet::PayloadVariant::Decoded(data)) = &pkt.payload_variant {
            if data.portnum == proto::PortNum::NodeinfoApp as i32 {
                match proto::User::decode(data.payload.as_slice()) {
                    Ok(user) => self
                        .directory
                        .upsert(node_id_from_num(pkt.from), entry_from_user(&user)),
                    Err(e) => debug!("Bad NODEINFO payload from 0x{:08x}: {}", pkt.from, e),
                }
            }
        }

        let relay_pkt = to_relay_packet(&pkt);
        if let Some(text) = relay_pkt.text() {
            trace!(
                "Mesh text from {:?} on channel {:?}: '{}'",
                relay_pkt.from_id,
                relay_pkt.channel,
                escape_log(text)
            );
        }
        let guard = self.subscriber.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(relay_pkt).is_err() {
                    warn!("Mesh packet subscriber has gone away");
                }
            }
            None => trace!("No mesh subscriber; dropping packet"),
        }
    }
}

#[cfg(feature = "serial")]
mod device {
    use super::*;
    use crate::config::MeshtasticConfig;
    use crate::relay::queue::MeshSender;
    use log::error;
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;

    /// A connected radio on a serial port.
    pub struct MeshtasticDevice {
        port_name: String,
        link: Arc<RadioLink>,
        writer: Mutex<Box<dyn SerialPort>>,
    }

    fn open_port(cfg: &MeshtasticConfig) -> Result<Box<dyn SerialPort>> {
        let mut builder =
            serialport::new(&cfg.port, cfg.baud_rate).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
            let mut tty = builder
                .open_native()
                .map_err(|e| anyhow!("Failed to open serial port {}: {}", cfg.port, e))?;
            tty.set_exclusive(cfg.exclusive)
                .map_err(|e| anyhow!("Failed to set exclusive={} on {}: {}", cfg.exclusive, cfg.port, e))?;
            Ok(Box::new(tty))
        }
        #[cfg(not(unix))]
        {
            builder
                .open()
                .map_err(|e| anyhow!("Failed to open serial port {}: {}", cfg.port, e))
        }
    }

    impl MeshtasticDevice {
        /// Open the port, start the reader and wait for the radio's config sync.
        pub async fn connect(cfg: &MeshtasticConfig, directory: NodeDirectory) -> Result<Arc<Self>> {
            info!(
                "Opening Meshtastic device on {} at {} baud (exclusive={})",
                cfg.port, cfg.baud_rate, cfg.exclusive
            );
            let mut port = open_port(cfg)?;
            // ESP32 boards need DTR/RTS asserted to come out of reset
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            sleep(Duration::from_millis(150)).await;

            let reader = port
                .try_clone()
                .map_err(|e| anyhow!("Failed to clone serial port {}: {}", cfg.port, e))?;
            let link = Arc::new(RadioLink::new(directory));
            spawn_reader(cfg.port.clone(), reader, link.clone())?;

            let device = Arc::new(Self {
                port_name: cfg.port.clone(),
                link,
                writer: Mutex::new(port),
            });

            // Wake the serial API before the first request
            device.write_bytes(&[framer::START2; 32])?;
            sleep(Duration::from_millis(100)).await;

            let id = device.link.begin_config();
            debug!("Requesting config (want_config_id=0x{:08x})", id);
            device.write_bytes(&encode_want_config(id)?)?;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(cfg.connect_timeout_secs);
            while !device.link.is_config_complete() {
                if tokio::time::Instant::now() >= deadline {
                    anyhow::bail!(
                        "Timed out after {}s waiting for config from {}",
                        cfg.connect_timeout_secs,
                        cfg.port
                    );
                }
                sleep(Duration::from_millis(100)).await;
            }
            Ok(device)
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }

        pub fn link(&self) -> &Arc<RadioLink> {
            &self.link
        }

        pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MeshPacket> {
            self.link.subscribe()
        }

        pub fn own_node_id(&self) -> Option<String> {
            self.link.own_node_id()
        }

        fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
            let mut port = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            port.write_all(bytes)?;
            port.flush()?;
            Ok(())
        }

        pub fn send_heartbeat(&self) -> Result<()> {
            self.write_bytes(&encode_heartbeat()?)
        }

        /// Keep the serial API session alive.
        pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
            let device = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let d = device.clone();
                    match tokio::task::spawn_blocking(move || d.send_heartbeat()).await {
                        Ok(Ok(())) => trace!("heartbeat sent"),
                        Ok(Err(e)) => warn!("Heartbeat send error: {}", e),
                        Err(e) => warn!("Heartbeat task failed: {}", e),
                    }
                }
            })
        }
    }

    impl MeshSender for MeshtasticDevice {
        fn send_text(&self, text: &str, channel: u32) -> Result<()> {
            let frame = encode_text_packet(text, channel)?;
            self.write_bytes(&frame)?;
            debug!(
                "Sent text on channel {} ({} bytes frame) via {}",
                channel,
                frame.len(),
                self.port_name
            );
            Ok(())
        }
    }

    fn spawn_reader(port_name: String, mut port: Box<dyn SerialPort>, link: Arc<RadioLink>) -> Result<()> {
        std::thread::Builder::new()
            .name("mesh-reader".into())
            .spawn(move || {
                let mut framer = framer::StreamFramer::new();
                let mut buf = [0u8; 1024];
                loop {
                    match port.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            framer.push(&buf[..n]);
                            while let Some(frame) = framer.next_frame() {
                                if let Err(e) = link.handle_frame(&frame) {
                                    debug!("{}", e);
                                }
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            error!("Serial read from {} failed: {}", port_name, e);
                            break;
                        }
                    }
                }
                link.close();
            })
            .map_err(|e| anyhow!("Failed to spawn serial reader: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::from_radio::PayloadVariant as FR;
    use proto::mesh_packet::PayloadVariant as MP;

    fn frame(variant: FR) -> Vec<u8> {
        proto::FromRadio {
            id: 1,
            payload_variant: Some(variant),
        }
        .encode_to_vec()
    }

    fn text_packet(from: u32, channel: u32, text: &str) -> proto::MeshPacket {
        proto::MeshPacket {
            from,
            to: BROADCAST_ADDR,
            channel,
            hop_start: 3,
            hop_limit: 2,
            payload_variant: Some(MP::Decoded(proto::Data {
                portnum: proto::PortNum::TextMessageApp as i32,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    #[test]
    fn converts_text_packet_and_maps_zero_to_absent() {
        let p = to_relay_packet(&text_packet(0x1234, 0, "hi"));
        assert_eq!(p.from_id.as_deref(), Some("!00001234"));
        assert_eq!(p.channel, None);
        assert_eq!(p.hops(), Some(1));
        assert_eq!(p.text(), Some("hi"));

        let mut pos = text_packet(0x1234, 2, "");
        if let Some(MP::Decoded(d)) = &mut pos.payload_variant {
            d.portnum = proto::PortNum::PositionApp as i32;
        }
        let p = to_relay_packet(&pos);
        assert_eq!(p.channel, Some(2));
        assert!(p.decoded.is_some());
        assert_eq!(p.text(), None);
    }

    #[test]
    fn myinfo_sets_identity_and_nodeinfo_fills_directory() {
        let link = RadioLink::new(NodeDirectory::new());
        assert_eq!(link.own_node_id(), None);
        link.handle_frame(&frame(FR::MyInfo(proto::MyNodeInfo {
            my_node_num: 0xdeadbeef,
        })))
        .unwrap();
        assert_eq!(link.own_node_id().as_deref(), Some("!deadbeef"));

        link.handle_frame(&frame(FR::NodeInfo(proto::NodeInfo {
            num: 0x42,
            user: Some(proto::User {
                id: "!00000042".into(),
                long_name: "Hill Top".into(),
                short_name: "".into(),
            }),
        })))
        .unwrap();
        let entry = link.directory().get("!00000042").unwrap();
        assert_eq!(entry.short_name, None);
        assert_eq!(entry.long_name.as_deref(), Some("Hill Top"));
    }

    #[test]
    fn config_complete_requires_matching_nonce() {
        let link = RadioLink::new(NodeDirectory::new());
        let id = link.begin_config();
        link.handle_frame(&frame(FR::ConfigCompleteId(id.wrapping_add(1))))
            .unwrap();
        assert!(!link.is_config_complete());
        link.handle_frame(&frame(FR::ConfigCompleteId(id))).unwrap();
        assert!(link.is_config_complete());
    }

    #[test]
    fn packets_reach_subscriber_only_once_installed() {
        let link = RadioLink::new(NodeDirectory::new());
        link.handle_frame(&frame(FR::Packet(text_packet(1, 0, "early"))))
            .unwrap();
        let mut rx = link.subscribe();
        link.handle_frame(&frame(FR::Packet(text_packet(1, 0, "late"))))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().text(), Some("late"));
        assert!(rx.try_recv().is_err());
        link.close();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn nodeinfo_packet_updates_directory() {
        let link = RadioLink::new(NodeDirectory::new());
        let user = proto::User {
            id: "!00000007".into(),
            long_name: "Seven".into(),
            short_name: "SVN".into(),
        };
        let pkt = proto::MeshPacket {
            from: 7,
            payload_variant: Some(MP::Decoded(proto::Data {
                portnum: proto::PortNum::NodeinfoApp as i32,
                payload: user.encode_to_vec(),
                ..Default::default()
            })),
            ..Default::default()
        };
        link.handle_frame(&frame(FR::Packet(pkt))).unwrap();
        assert_eq!(
            link.directory().get("!00000007").unwrap().short_name.as_deref(),
            Some("SVN")
        );
    }

    #[test]
    fn garbage_frame_is_an_error() {
        let link = RadioLink::new(NodeDirectory::new());
        assert!(link.handle_frame(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn text_packet_encodes_broadcast_on_channel() {
        let bytes = encode_text_packet("hello mesh", 3).unwrap();
        assert_eq!(&bytes[..2], &[framer::START1, framer::START2]);
        let msg = proto::ToRadio::decode(&bytes[4..]).unwrap();
        let Some(proto::to_radio::PayloadVariant::Packet(pkt)) = msg.payload_variant else {
            panic!("expected packet");
        };
        assert_eq!(pkt.to, BROADCAST_ADDR);
        assert_eq!(pkt.channel, 3);
        assert_ne!(pkt.id, 0);
        let Some(MP::Decoded(data)) = pkt.payload_variant else {
            panic!("expected decoded payload");
        };
        assert_eq!(data.payload, b"hello mesh");
    }
}
