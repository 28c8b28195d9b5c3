//! OSC processor (spec.md §4.2.2) plus its address/value-convention variants
//! `YmhOSC`, `ADMOSC`, `RemapOSC`. Grounded on `core/src/protocol/osc.rs`:
//! the NTP-epoch timestamp math and the `Argument` → `rosc::OscType`
//! conversion are carried over almost unchanged, generalized from
//! SuperDirt-event encoding to remote-object encoding.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rosc::{OscMessage, OscPacket, OscType};
use thread_priority::{ThreadBuilder, ThreadPriority};

use super::{NetworkProcessorBase, ProcessorCommon, ProcessorListener, ProtocolProcessor};
use crate::error::EngineError;
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo, ValueType,
};
use crate::timer::TimerThread;

/// Unix epoch expressed in NTP seconds, the same constant the teacher's OSC
/// encoder uses for `OscTime` timestamps (`core/src/protocol/osc.rs`).
pub const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Which address-pattern and value dialect an OSC-family processor speaks.
/// `YmhOSC`/`ADMOSC`/`RemapOSC` are the same wire processor with a
/// different `AddressDialect` rather than separate structs, since their
/// only difference is the string convention (spec.md §4.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressDialect {
    /// d&b DS100 dialect (`/dbaudio1/...`), the reference dialect (spec.md §6).
    DbAudio1,
    YamahaOsc,
    AdmOsc,
    /// Address convention driven entirely by the configured `Remappings`
    /// table (spec.md §6 "RemapOSC-specific").
    Remap,
}

fn roi_address_segment(roi: Roi) -> Option<&'static str> {
    use Roi::*;
    Some(match roi {
        HeartbeatPing => "heartbeat/ping",
        HeartbeatPong => "heartbeat/pong",
        DeviceStatus => "status",
        DeviceErrorText => "error",
        MatrixInput_Mute => "matrixinput/mute",
        MatrixInput_Gain => "matrixinput/gain",
        MatrixInput_Delay => "matrixinput/delay",
        MatrixInput_Polarity => "matrixinput/polarity",
        MatrixInput_EqEnable => "matrixinput/eqenable",
        MatrixInput_Name => "matrixinput/name",
        MatrixInput_LevelMeterPreMute => "matrixinput/levelmeterpremute",
        MatrixInput_LevelMeterPostMute => "matrixinput/levelmeterpostmute",
        MatrixOutput_Mute => "matrixoutput/mute",
        MatrixOutput_Gain => "matrixoutput/gain",
        MatrixOutput_Delay => "matrixoutput/delay",
        MatrixOutput_Polarity => "matrixoutput/polarity",
        MatrixOutput_EqEnable => "matrixoutput/eqenable",
        MatrixOutput_Name => "matrixoutput/name",
        MatrixOutput_LevelMeterPreMute => "matrixoutput/levelmeterpremute",
        MatrixOutput_LevelMeterPostMute => "matrixoutput/levelmeterpostmute",
        MatrixNode_CrossPointGain => "matrixnode/gain",
        MatrixNode_CrossPointEnable => "matrixnode/enable",
        SourcePosition_XYZ => "positioning/source_position",
        SourcePosition_XY => "positioning/source_position_xy",
        SourcePosition_X => "positioning/source_position_x",
        SourcePosition_Y => "positioning/source_position_y",
        CoordinateMapping_SourcePosition_XYZ => "coordinatemapping/source_position",
        CoordinateMapping_SourcePosition_XY => "coordinatemapping/source_position_xy",
        CoordinateMapping_SourcePosition_X => "coordinatemapping/source_position_x",
        CoordinateMapping_SourcePosition_Y => "coordinatemapping/source_position_y",
        SoundObjectSpread => "positioning/spread",
        SoundObjectDelayMode => "positioning/delaymode",
        ReverbRoomId => "reverb/roomid",
        ReverbPredelayFactor => "reverb/predelayfactor",
        ReverbRearLevel => "reverb/rearlevel",
        ReverbSendGain => "reverb/sendgain",
        ReverbZoneGain => "reverb/zone/gain",
        ReverbZoneMute => "reverb/zone/mute",
        ReverbZoneEqEnable => "reverb/zone/eqenable",
        ReverbZoneLevelMeter => "reverb/zone/levelmeter",
        FunctionGroup_Delay => "functiongroup/delay",
        FunctionGroup_Spread => "functiongroup/spread",
        FunctionGroup_Name => "functiongroup/name",
        Scene_Index => "scene/index",
        Scene_Name => "scene/name",
        Scene_Comment => "scene/comment",
        Scene_Recall => "scene/recall",
        Scene_Next => "scene/next",
        Scene_Previous => "scene/previous",
        CoordinateMappingSettings_P1Real => "coordinatemappingsettings/p1real",
        CoordinateMappingSettings_P2Real => "coordinatemappingsettings/p2real",
        CoordinateMappingSettings_P3Real => "coordinatemappingsettings/p3real",
        CoordinateMappingSettings_P4Real => "coordinatemappingsettings/p4real",
        CoordinateMappingSettings_P1Virtual => "coordinatemappingsettings/p1virtual",
        CoordinateMappingSettings_P2Virtual => "coordinatemappingsettings/p2virtual",
        CoordinateMappingSettings_Flip => "coordinatemappingsettings/flip",
        CoordinateMappingSettings_Name => "coordinatemappingsettings/name",
        SpeakerPosition => "speakerposition",
        MatrixInput_Select => "matrixinput/select",
        SoundObjectSelect => "positioning/select",
        GetAllKnownValues => "getallknownvalues",
        BridgingMAX => return None,
    })
}

fn all_addressable_rois() -> Vec<Roi> {
    use Roi::*;
    vec![
        HeartbeatPing,
        HeartbeatPong,
        DeviceStatus,
        DeviceErrorText,
        MatrixInput_Mute,
        MatrixInput_Gain,
        MatrixInput_Delay,
        MatrixInput_Polarity,
        MatrixInput_EqEnable,
        MatrixInput_Name,
        MatrixInput_LevelMeterPreMute,
        MatrixInput_LevelMeterPostMute,
        MatrixOutput_Mute,
        MatrixOutput_Gain,
        MatrixOutput_Delay,
        MatrixOutput_Polarity,
        MatrixOutput_EqEnable,
        MatrixOutput_Name,
        MatrixOutput_LevelMeterPreMute,
        MatrixOutput_LevelMeterPostMute,
        MatrixNode_CrossPointGain,
        MatrixNode_CrossPointEnable,
        SourcePosition_XYZ,
        SourcePosition_XY,
        SourcePosition_X,
        SourcePosition_Y,
        CoordinateMapping_SourcePosition_XYZ,
        CoordinateMapping_SourcePosition_XY,
        CoordinateMapping_SourcePosition_X,
        CoordinateMapping_SourcePosition_Y,
        SoundObjectSpread,
        SoundObjectDelayMode,
        ReverbRoomId,
        ReverbPredelayFactor,
        ReverbRearLevel,
        ReverbSendGain,
        ReverbZoneGain,
        ReverbZoneMute,
        ReverbZoneEqEnable,
        ReverbZoneLevelMeter,
        FunctionGroup_Delay,
        FunctionGroup_Spread,
        FunctionGroup_Name,
        Scene_Index,
        Scene_Name,
        Scene_Comment,
        Scene_Recall,
        Scene_Next,
        Scene_Previous,
        CoordinateMappingSettings_P1Real,
        CoordinateMappingSettings_P2Real,
        CoordinateMappingSettings_P3Real,
        CoordinateMappingSettings_P4Real,
        CoordinateMappingSettings_P1Virtual,
        CoordinateMappingSettings_P2Virtual,
        CoordinateMappingSettings_Flip,
        CoordinateMappingSettings_Name,
        SpeakerPosition,
        MatrixInput_Select,
        SoundObjectSelect,
        GetAllKnownValues,
    ]
}

fn dialect_root(dialect: AddressDialect) -> &'static str {
    match dialect {
        AddressDialect::DbAudio1 => "dbaudio1",
        AddressDialect::YamahaOsc => "yamahaosc",
        AddressDialect::AdmOsc => "admosc",
        AddressDialect::Remap => "remap",
    }
}

/// Builds the stable address pattern string for `(roi, addressing)`,
/// appending `record` then `channel` trailing segments when the ROI
/// requires them (spec.md §4.2.2: "channel last, record second-to-last").
pub fn build_address(dialect: AddressDialect, roi: Roi, addressing: Addr) -> Option<String> {
    let segment = roi_address_segment(roi)?;
    let mut s = format!("/{}/{}", dialect_root(dialect), segment);
    if roi.is_record_addressing() && addressing.has_record() {
        s.push('/');
        s.push_str(&addressing.second.to_string());
    }
    if roi.is_channel_addressing() && addressing.has_channel() {
        s.push('/');
        s.push_str(&addressing.first.to_string());
    }
    Some(s)
}

/// Decodes an incoming OSC address back into `(roi, addressing)` by
/// `startsWith` matching against the known segment table, then parsing
/// trailing numeric path components (spec.md §4.2.2 "Decoding rule").
pub fn resolve_address(dialect: AddressDialect, address: &str) -> Option<(Roi, Addr)> {
    let root = format!("/{}/", dialect_root(dialect));
    let rest = address.strip_prefix(&root)?;

    let mut best: Option<(Roi, &str)> = None;
    for roi in all_addressable_rois() {
        if let Some(segment) = roi_address_segment(roi) {
            if rest == segment || rest.starts_with(&format!("{}/", segment)) {
                if best.map(|(_, s)| s.len()).unwrap_or(0) < segment.len() {
                    best = Some((roi, segment));
                }
            }
        }
    }
    let (roi, segment) = best?;
    let trailing = rest.strip_prefix(segment).unwrap_or("").trim_start_matches('/');
    let parts: Vec<&str> = if trailing.is_empty() {
        Vec::new()
    } else {
        trailing.split('/').collect()
    };

    let (mut first, mut second) = (crate::model::INVALID_ADDRESS_VALUE, crate::model::INVALID_ADDRESS_VALUE);
    match (roi.is_record_addressing(), roi.is_channel_addressing(), parts.len()) {
        (true, true, 2) => {
            second = parts[0].parse().ok()?;
            first = parts[1].parse().ok()?;
        }
        (true, true, 1) => {
            first = parts[0].parse().ok()?;
        }
        (false, true, 1) => {
            first = parts[0].parse().ok()?;
        }
        (true, false, 1) => {
            second = parts[0].parse().ok()?;
        }
        _ => {}
    }
    Some((roi, Addr::channel_record(first, second)))
}

fn data_to_osc_args(data: &Data) -> Vec<OscType> {
    match data.value_type {
        ValueType::None => vec![],
        ValueType::Int => data.as_int().map(OscType::Int).into_iter().collect(),
        ValueType::Float => data
            .as_floats()
            .unwrap_or_default()
            .into_iter()
            .map(OscType::Float)
            .collect(),
        ValueType::String => data.as_string().map(OscType::String).into_iter().collect(),
    }
}

fn osc_args_to_data(addressing: Addr, args: &[OscType]) -> Data {
    if args.is_empty() {
        return Data::empty(addressing);
    }
    if let Some(OscType::String(s)) = args.first() {
        return Data::from_string(addressing, s);
    }
    if let Some(OscType::Int(i)) = args.first() {
        return Data::from_int(addressing, *i);
    }
    let floats: Vec<f32> = args
        .iter()
        .filter_map(|a| match a {
            OscType::Float(f) => Some(*f),
            OscType::Int(i) => Some(*i as f32),
            OscType::Double(d) => Some(*d as f32),
            _ => None,
        })
        .collect();
    if floats.is_empty() {
        Data::empty(addressing)
    } else {
        Data::from_floats(addressing, &floats)
    }
}

pub struct OscProcessor {
    common: ProcessorCommon,
    /// Shared with the active-object poll timer so auto-detected peers
    /// (spec.md §4.2.1) stay current across ticks, rather than a one-shot
    /// snapshot taken at `start()` (spec.md §9 "Cyclic parent pointers" —
    /// shared state via `Arc`, not a back-reference).
    net: Arc<NetworkProcessorBase>,
    dialect: AddressDialect,
    running: Arc<AtomicBool>,
    socket: Option<UdpSocket>,
    rx_thread: Option<std::thread::JoinHandle<()>>,
    listener: Option<Arc<dyn ProcessorListener>>,
    peer_addr: Option<SocketAddr>,
    /// Drives the shared §4.2 active-object timer.
    active_timer: Option<TimerThread>,
}

impl OscProcessor {
    pub fn new(
        id: ProtocolId,
        role: Role,
        dialect: AddressDialect,
        ip_address: Option<&str>,
        client_port: u16,
        host_port: u16,
        uses_active_objects: bool,
        polling_interval_ms: u64,
        listener: Option<Arc<dyn ProcessorListener>>,
    ) -> Result<Self, EngineError> {
        let net = Arc::new(NetworkProcessorBase::new(ip_address, client_port, host_port)?);
        let peer_addr = match ip_address {
            Some(ip) => {
                let addr: IpAddr = ip
                    .parse()
                    .map_err(|e| EngineError::new(format!("invalid IP '{}': {}", ip, e)))?;
                Some(SocketAddr::new(addr, client_port))
            }
            None => None,
        };
        Ok(OscProcessor {
            common: ProcessorCommon::new(id, role, uses_active_objects, polling_interval_ms),
            net,
            dialect,
            running: Arc::new(AtomicBool::new(false)),
            socket: None,
            rx_thread: None,
            listener,
            peer_addr,
            active_timer: None,
        })
    }

    pub fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn decode_packet(
        dialect: AddressDialect,
        msg: &OscMessage,
    ) -> Option<(Roi, Addr, Data)> {
        let (roi, addressing) = resolve_address(dialect, &msg.addr)?;
        let data = osc_args_to_data(addressing, &msg.args);
        Some((roi, addressing, data))
    }
}

impl ProtocolProcessor for OscProcessor {
    fn id(&self) -> ProtocolId {
        self.common.id
    }

    fn role(&self) -> Role {
        self.common.role
    }

    fn processor_type(&self) -> &'static str {
        match self.dialect {
            AddressDialect::DbAudio1 => "OSC",
            AddressDialect::YamahaOsc => "YamahaOSC",
            AddressDialect::AdmOsc => "ADMOSC",
            AddressDialect::Remap => "RemapOSC",
        }
    }

    fn start(&mut self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return true;
        }
        let socket = match UdpSocket::bind(("0.0.0.0", self.net.host_port)) {
            Ok(s) => s,
            Err(e) => {
                crate::log_error!(None, "OSC processor {} failed to bind: {}", self.common.id, e);
                return false;
            }
        };
        if socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .is_err()
        {
            return false;
        }
        self.running.store(true, Ordering::SeqCst);

        let rx_socket = match socket.try_clone() {
            Ok(s) => s,
            Err(_) => return false,
        };
        let running = self.running.clone();
        let dialect = self.dialect;
        let listener = self.listener.clone();
        let id = self.common.id;
        let handle = ThreadBuilder::default()
            .name(format!("osc-rx-{}", id))
            .priority(ThreadPriority::Min)
            .spawn(move |_| {
                let mut buf = [0u8; 4096];
                while running.load(Ordering::SeqCst) {
                    match rx_socket.recv_from(&mut buf) {
                        Ok((size, _from)) => {
                            if let Ok((_, OscPacket::Message(msg))) =
                                rosc::decoder::decode_udp(&buf[..size])
                            {
                                if let Some((roi, addressing, data)) =
                                    OscProcessor::decode_packet(dialect, &msg)
                                {
                                    if let Some(l) = &listener {
                                        l.on_protocol_message_received(
                                            id,
                                            roi,
                                            addressing,
                                            data,
                                            crate::model::RemoteObjectMessageMetaInfo::unsolicited(),
                                        );
                                    }
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

        // Shared §4.2 active-object timer: if any active objects and
        // interval > 0, issue a value-query (empty-payload send) for each
        // at the configured interval.
        if self.common.uses_active_objects && self.common.polling_interval_ms > 0 {
            if let Ok(poll_socket) = socket.try_clone() {
                let actives: Vec<RemoteObject> = self
                    .common
                    .active_objects()
                    .into_iter()
                    .filter(|ro| !self.common.is_muted(ro))
                    .collect();
                let dialect = self.dialect;
                let net = self.net.clone();
                let peer_addr = self.peer_addr;
                let interval = Duration::from_millis(self.common.polling_interval_ms);
                self.active_timer = Some(TimerThread::start(
                    &format!("osc-poll-{}", id),
                    interval,
                    interval,
                    move || {
                        let Some(target) = peer_addr
                            .or_else(|| net.effective_peer().map(|ip| SocketAddr::new(ip, net.client_port)))
                        else {
                            return;
                        };
                        for ro in &actives {
                            let Some(address) = build_address(dialect, ro.roi, ro.addressing) else {
                                continue;
                            };
                            let msg = OscMessage { addr: address, args: vec![] };
                            if let Ok(bytes) = rosc::encoder::encode(&OscPacket::Message(msg)) {
                                let _ = poll_socket.send_to(&bytes, target);
                            }
                        }
                    },
                ));
            }
        }

        self.socket = Some(socket);
        true
    }

    fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.active_timer = None;
        if let Some(j) = self.rx_thread.take() {
            let _ = j.join();
        }
        self.socket = None;
        true
    }

    fn send_remote_object_message(
        &mut self,
        roi: Roi,
        data: &Data,
        _external_id: Option<ProtocolId>,
    ) -> bool {
        let ro = crate::model::RemoteObject::new(roi, data.addressing);
        if self.common.is_muted(&ro) {
            return true;
        }
        let Some(address) = build_address(self.dialect, roi, data.addressing) else {
            return false;
        };
        let Some(socket) = &self.socket else { return false };
        let target = match self.peer_addr.or_else(|| {
            self.net
                .effective_peer()
                .map(|ip| SocketAddr::new(ip, self.net.client_port))
        }) {
            Some(t) => t,
            None => return false,
        };
        let msg = OscMessage {
            addr: address,
            args: data_to_osc_args(data),
        };
        match rosc::encoder::encode(&OscPacket::Message(msg)) {
            Ok(bytes) => socket.send_to(&bytes, target).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_resolve_address_round_trip_for_matrix_input_mute() {
        let addr = build_address(AddressDialect::DbAudio1, Roi::MatrixInput_Mute, Addr::channel(3)).unwrap();
        assert_eq!(addr, "/dbaudio1/matrixinput/mute/3");
        let (roi, addressing) = resolve_address(AddressDialect::DbAudio1, &addr).unwrap();
        assert_eq!(roi, Roi::MatrixInput_Mute);
        assert_eq!(addressing, Addr::channel(3));
    }

    #[test]
    fn coordinate_mapping_round_trips_record_then_channel() {
        let addr = build_address(
            AddressDialect::DbAudio1,
            Roi::CoordinateMapping_SourcePosition_XY,
            Addr::channel_record(1, 1),
        )
        .unwrap();
        assert_eq!(addr, "/dbaudio1/coordinatemapping/source_position_xy/1/1");
        let (roi, addressing) = resolve_address(AddressDialect::DbAudio1, &addr).unwrap();
        assert_eq!(roi, Roi::CoordinateMapping_SourcePosition_XY);
        assert_eq!(addressing, Addr::channel_record(1, 1));
    }

    #[test]
    fn scene_recall_has_no_trailing_segments() {
        let addr = build_address(AddressDialect::DbAudio1, Roi::Scene_Recall, Addr::NONE).unwrap();
        assert_eq!(addr, "/dbaudio1/scene/recall");
    }

    #[test]
    fn args_round_trip_for_float_payload() {
        let data = Data::from_floats(Addr::channel(1), &[0.25, 0.75]);
        let args = data_to_osc_args(&data);
        let back = osc_args_to_data(Addr::channel(1), &args);
        assert_eq!(back.as_floats().unwrap(), vec![0.25, 0.75]);
    }

    /// Shared §4.2 active-object timer: with an active object configured
    /// and a non-zero polling interval, `start()` must itself issue
    /// empty-payload queries at that interval, with no external driver.
    #[test]
    fn active_object_timer_emits_value_queries_without_external_driving() {
        let harness = UdpSocket::bind("127.0.0.1:0").expect("bind harness");
        harness.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let harness_port = harness.local_addr().unwrap().port();
        let host_port = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let mut proc = OscProcessor::new(
            ProtocolId(1),
            Role::A,
            AddressDialect::DbAudio1,
            Some("127.0.0.1"),
            harness_port,
            host_port,
            true,
            10,
            None,
        )
        .unwrap();
        proc.common.add_active_object(RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(3)));
        assert!(proc.start());

        let mut buf = [0u8; 4096];
        let (size, _) = harness.recv_from(&mut buf).expect("active-object query arrives");
        if let Ok((_, OscPacket::Message(msg))) = rosc::decoder::decode_udp(&buf[..size]) {
            assert_eq!(msg.addr, "/dbaudio1/matrixinput/mute/3");
            assert!(msg.args.is_empty());
        } else {
            panic!("expected an OSC message");
        }
        proc.stop();
    }
}
