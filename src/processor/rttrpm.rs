//! RTTrPM processor (spec.md §4.2.5): Blacktrax RTTrPM binary packet
//! parsing over UDP. No teacher file parses a binary tracking protocol, so
//! this module is grounded directly on spec.md §4.2.5/§9: packet modules
//! are read with an explicit, fixed layout and read offsets are advanced
//! module-by-module; invalid modules are skipped rather than aborting the
//! whole packet. Byte order is explicit (spec.md §9 "Endianness / binary
//! layouts" — network byte order, big-endian, chosen and documented here
//! rather than assumed from host alignment).

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thread_priority::{ThreadBuilder, ThreadPriority};

use super::{ProcessorCommon, ProcessorListener, ProtocolProcessor};
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo,
};

const MODULE_HEADER_SIZE: usize = 4;
const TRACKABLE_HEADER_NAME_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketModule {
    CentroidPosition { x: f32, y: f32, z: f32 },
    CentroidAccelVelo { ax: f32, ay: f32, az: f32, vx: f32, vy: f32, vz: f32 },
    TrackedPointPosition { x: f32, y: f32, z: f32 },
    Euler { yaw: f32, pitch: f32, roll: f32 },
    Quaternion { w: f32, x: f32, y: f32, z: f32 },
    ZoneCollision { zone_id: u32, state: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackableHeader {
    pub trackable_id: u32,
    pub name: String,
    pub submodule_count: u16,
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_f32(buf: &[u8], offset: usize) -> Option<f32> {
    read_u32(buf, offset).map(f32::from_bits)
}

/// Parses one trackable header starting at `offset`. Returns the header and
/// the offset of the first module that follows it.
fn parse_trackable_header(buf: &[u8], offset: usize) -> Option<(TrackableHeader, usize)> {
    let trackable_id = read_u32(buf, offset)?;
    let name_bytes = buf.get(offset + 4..offset + 4 + TRACKABLE_HEADER_NAME_LEN)?;
    let name = String::from_utf8_lossy(name_bytes)
        .trim_end_matches('\0')
        .to_string();
    let submodule_count = read_u16(buf, offset + 4 + TRACKABLE_HEADER_NAME_LEN)?;
    Some((
        TrackableHeader {
            trackable_id,
            name,
            submodule_count,
        },
        offset + 4 + TRACKABLE_HEADER_NAME_LEN + 2,
    ))
}

/// Parses a single module at `offset`: `[size:u16][type:u16][payload]`.
/// A module with size 0 or an unrecognized type code is skipped rather than
/// aborting the whole packet (spec.md §4.2.5 "invalid modules ... are
/// skipped"). Returns the decoded module (if recognized) and the offset of
/// the next module.
fn parse_module(buf: &[u8], offset: usize) -> Option<(Option<PacketModule>, usize)> {
    let size = read_u16(buf, offset)? as usize;
    let type_code = read_u16(buf, offset + 2)?;
    if size == 0 {
        return None;
    }
    let payload_offset = offset + MODULE_HEADER_SIZE;
    let next_offset = offset + MODULE_HEADER_SIZE + size;
    if buf.len() < next_offset {
        return None;
    }
    let module = match type_code {
        0 => Some(PacketModule::CentroidPosition {
            x: read_f32(buf, payload_offset)?,
            y: read_f32(buf, payload_offset + 4)?,
            z: read_f32(buf, payload_offset + 8)?,
        }),
        1 => Some(PacketModule::CentroidAccelVelo {
            ax: read_f32(buf, payload_offset)?,
            ay: read_f32(buf, payload_offset + 4)?,
            az: read_f32(buf, payload_offset + 8)?,
            vx: read_f32(buf, payload_offset + 12)?,
            vy: read_f32(buf, payload_offset + 16)?,
            vz: read_f32(buf, payload_offset + 20)?,
        }),
        2 => Some(PacketModule::TrackedPointPosition {
            x: read_f32(buf, payload_offset)?,
            y: read_f32(buf, payload_offset + 4)?,
            z: read_f32(buf, payload_offset + 8)?,
        }),
        3 => Some(PacketModule::Euler {
            yaw: read_f32(buf, payload_offset)?,
            pitch: read_f32(buf, payload_offset + 4)?,
            roll: read_f32(buf, payload_offset + 8)?,
        }),
        4 => Some(PacketModule::Quaternion {
            w: read_f32(buf, payload_offset)?,
            x: read_f32(buf, payload_offset + 4)?,
            y: read_f32(buf, payload_offset + 8)?,
            z: read_f32(buf, payload_offset + 12)?,
        }),
        5 => Some(PacketModule::ZoneCollision {
            zone_id: read_u32(buf, payload_offset)?,
            state: read_u32(buf, payload_offset + 4)?,
        }),
        _ => None, // unrecognized type code: skip, keep advancing
    };
    Some((module, next_offset))
}

/// Parses an entire RTTrPM payload into a trackable header and its decoded
/// modules, explicitly advancing the read offset per module (spec.md §9).
pub fn parse_packet(buf: &[u8]) -> Option<(TrackableHeader, Vec<PacketModule>)> {
    let (header, mut offset) = parse_trackable_header(buf, 0)?;
    let mut modules = Vec::new();
    for _ in 0..header.submodule_count {
        match parse_module(buf, offset) {
            Some((module, next_offset)) => {
                if let Some(m) = module {
                    modules.push(m);
                }
                offset = next_offset;
            }
            None => break,
        }
    }
    Some((header, modules))
}

pub struct RttrpmProcessor {
    common: ProcessorCommon,
    host_port: u16,
    running: Arc<AtomicBool>,
    rx_thread: Option<std::thread::JoinHandle<()>>,
    listener: Option<Arc<dyn ProcessorListener>>,
}

impl RttrpmProcessor {
    pub fn new(
        id: ProtocolId,
        role: Role,
        host_port: u16,
        listener: Option<Arc<dyn ProcessorListener>>,
    ) -> Self {
        RttrpmProcessor {
            common: ProcessorCommon::new(id, role, false, 0),
            host_port,
            running: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
            listener,
        }
    }

    pub fn common(&self) -> &ProcessorCommon {
        &self.common
    }
}

impl ProtocolProcessor for RttrpmProcessor {
    fn id(&self) -> ProtocolId {
        self.common.id
    }

    fn role(&self) -> Role {
        self.common.role
    }

    fn processor_type(&self) -> &'static str {
        "RTTrPM"
    }

    fn start(&mut self) -> bool {
        let socket = match UdpSocket::bind(("0.0.0.0", self.host_port)) {
            Ok(s) => s,
            Err(e) => {
                crate::log_error!(None, "RTTrPM processor {} failed to bind: {}", self.common.id, e);
                return false;
            }
        };
        if socket.set_read_timeout(Some(Duration::from_millis(50))).is_err() {
            return false;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let listener = self.listener.clone();
        let id = self.common.id;
        let handle = ThreadBuilder::default()
            .name(format!("rttrpm-rx-{}", id))
            .priority(ThreadPriority::Min)
            .spawn(move |_| {
                let mut buf = [0u8; 2048];
                while running.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buf) {
                        Ok((size, _from)) => {
                            if let Some((header, modules)) = parse_packet(&buf[..size]) {
                                for (i, module) in modules.into_iter().enumerate() {
                                    if let PacketModule::CentroidPosition { x, y, z } = module {
                                        let addressing = Addr::channel(header.trackable_id as i32);
                                        let data = Data::from_floats(addressing, &[x, y, z]);
                                        if let Some(l) = &listener {
                                            l.on_protocol_message_received(
                                                id,
                                                Roi::SpeakerPosition,
                                                addressing,
                                                data,
                                                MetaInfo::unsolicited(),
                                            );
                                        }
                                    }
                                    let _ = i;
                                }
                            }
                        }
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(_) => break,
                    }
                }
            });
        self.rx_thread = handle.ok();
        true
    }

    fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        if let Some(j) = self.rx_thread.take() {
            let _ = j.join();
        }
        true
    }

    fn send_remote_object_message(&mut self, _roi: Roi, _data: &Data, _external_id: Option<ProtocolId>) -> bool {
        // RTTrPM is a receive-only tracking feed in this bridging role.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_f32(buf: &mut Vec<u8>, v: f32) {
        buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    #[test]
    fn parses_header_and_centroid_module() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_be_bytes()); // trackable id
        buf.extend_from_slice(b"cam-one\0"); // 8-byte name
        buf.extend_from_slice(&1u16.to_be_bytes()); // submodule count

        buf.extend_from_slice(&12u16.to_be_bytes()); // module size
        buf.extend_from_slice(&0u16.to_be_bytes()); // module type: centroid
        push_f32(&mut buf, 1.0);
        push_f32(&mut buf, 2.0);
        push_f32(&mut buf, 3.0);

        let (header, modules) = parse_packet(&buf).unwrap();
        assert_eq!(header.trackable_id, 7);
        assert_eq!(header.name, "cam-one");
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0], PacketModule::CentroidPosition { x: 1.0, y: 2.0, z: 3.0 });
    }

    #[test]
    fn zero_size_module_stops_without_panicking() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"x\0\0\0\0\0\0\0");
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // size 0: invalid, skipped
        buf.extend_from_slice(&0u16.to_be_bytes());

        let (_header, modules) = parse_packet(&buf).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn unrecognized_type_code_is_skipped_but_parsing_continues() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"x\0\0\0\0\0\0\0");
        buf.extend_from_slice(&2u16.to_be_bytes());

        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.extend_from_slice(&99u16.to_be_bytes()); // unknown type
        buf.extend_from_slice(&[0u8; 8]);

        buf.extend_from_slice(&12u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        push_f32(&mut buf, 4.0);
        push_f32(&mut buf, 5.0);
        push_f32(&mut buf, 6.0);

        let (_header, modules) = parse_packet(&buf).unwrap();
        assert_eq!(modules.len(), 1);
    }
}
