//! MIDI processor (spec.md §4.2.4). Wire encoding is grounded in
//! `core/src/protocol/midi.rs::MIDIMessage::to_bytes` (note/CC/pitch-bend/
//! program-change byte layout, 1-based→0-based channel conversion); the
//! command-assignment table, selection semantics and output deaf-window are
//! new, specified in spec.md §4.2.4/§8 P7/S6.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use midir::{MidiOutput, MidiOutputConnection};

use super::{ProcessorCommon, ProcessorListener, ProtocolProcessor};
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo, ValueRange,
};

/// Default output deaf-window: suppresses outgoing echoes within this many
/// ms of the last *received* event on the same `(roi, addressing)`,
/// preventing motor-fader feedback loops (spec.md §4.2.4, P7).
pub const DEFAULT_DEAF_WINDOW_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiAssignmentKind {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
    PitchBend,
    Aftertouch,
    ChannelPressure,
}

#[derive(Debug, Clone, Copy)]
pub struct MidiAssignment {
    pub roi: Roi,
    pub kind: MidiAssignmentKind,
    pub channel: u8,
    /// `(low, high)` inclusive command value range. When present, the
    /// offset of the incoming command value within this range determines
    /// the channel/index for selection-style ROIs (spec.md §4.2.4).
    pub command_range: Option<(u8, u8)>,
    /// Engineering-unit value range this assignment's 7/14-bit raw value
    /// maps onto (spec.md §4.2.4 "value-range remap").
    pub value_range: Option<ValueRange>,
}

impl MidiAssignment {
    fn is_selection_roi(&self) -> bool {
        matches!(self.roi, Roi::MatrixInput_Select | Roi::SoundObjectSelect)
    }
}

struct SelectionState {
    selected: Option<i32>,
}

pub struct MidiProcessor {
    common: ProcessorCommon,
    assignments: Vec<MidiAssignment>,
    output_device_name: Option<String>,
    output: Option<MidiOutputConnection>,
    listener: Option<Arc<dyn ProcessorListener>>,
    last_received: Mutex<HashMap<RemoteObject, Instant>>,
    deaf_window: Duration,
    selection: Mutex<SelectionState>,
}

impl MidiProcessor {
    pub fn new(
        id: ProtocolId,
        role: Role,
        assignments: Vec<MidiAssignment>,
        output_device_name: Option<String>,
        uses_active_objects: bool,
        polling_interval_ms: u64,
        listener: Option<Arc<dyn ProcessorListener>>,
    ) -> Self {
        MidiProcessor {
            common: ProcessorCommon::new(id, role, uses_active_objects, polling_interval_ms),
            assignments,
            output_device_name,
            output: None,
            listener,
            last_received: Mutex::new(HashMap::new()),
            deaf_window: Duration::from_millis(DEFAULT_DEAF_WINDOW_MS),
            selection: Mutex::new(SelectionState { selected: None }),
        }
    }

    pub fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn find_assignment(&self, kind: MidiAssignmentKind, channel: u8, command: u8) -> Option<&MidiAssignment> {
        self.assignments.iter().find(|a| {
            a.kind == kind
                && a.channel == channel
                && a.command_range
                    .map(|(lo, hi)| command >= lo && command <= hi)
                    .unwrap_or(true)
        })
    }

    /// Processes one raw MIDI receive event. Applies the first matching
    /// assignment (spec.md §4.2.4 "first matching assignment wins"),
    /// records the deaf-window timestamp, and — for selection-capable
    /// ROIs — synthesizes deselect/select pairs (spec.md §8 S6).
    pub fn handle_incoming(&self, kind: MidiAssignmentKind, channel_raw: u8, command: u8, value: u8) {
        let channel = channel_raw.saturating_sub(1);
        let Some(assignment) = self.find_assignment(kind, channel, command).cloned() else {
            return;
        };

        if assignment.is_selection_roi() {
            self.handle_selection(&assignment, command);
            return;
        }

        let addressing = Addr::channel(command as i32 + 1);
        let data = match assignment.value_range {
            Some(range) => {
                let normalized = value as f32 / 127.0;
                Data::from_float(addressing, range.denormalize(normalized))
            }
            None => Data::from_int(addressing, value as i32),
        };
        let ro = RemoteObject::new(assignment.roi, addressing);
        self.last_received
            .lock()
            .expect("poisoned")
            .insert(ro, Instant::now());

        if let Some(l) = &self.listener {
            l.on_protocol_message_received(
                self.common.id,
                assignment.roi,
                addressing,
                data,
                MetaInfo::unsolicited(),
            );
        }
    }

    /// Selection toggles: the first receipt of a command within range
    /// emits `deselect(previous)` (if any) + `select(new)`; receiving the
    /// *same* command again deselects and clears (spec.md §4.2.4, §8 S6).
    fn handle_selection(&self, assignment: &MidiAssignment, command: u8) {
        let (lo, _hi) = assignment.command_range.unwrap_or((command, command));
        let new_channel = command as i32 - lo as i32 + 1;
        let mut state = self.selection.lock().expect("poisoned");
        let previous = state.selected;

        if previous == Some(new_channel) {
            state.selected = None;
            self.emit_select_event(assignment.roi, new_channel, false);
        } else {
            if let Some(prev) = previous {
                self.emit_select_event(assignment.roi, prev, false);
            }
            state.selected = Some(new_channel);
            self.emit_select_event(assignment.roi, new_channel, true);
        }
    }

    fn emit_select_event(&self, roi: Roi, channel: i32, selected: bool) {
        let addressing = Addr::channel(channel);
        let data = Data::from_int(addressing, if selected { 1 } else { 0 });
        if let Some(l) = &self.listener {
            l.on_protocol_message_received(self.common.id, roi, addressing, data, MetaInfo::unsolicited());
        }
    }

    fn within_deaf_window(&self, ro: &RemoteObject) -> bool {
        match self.last_received.lock().expect("poisoned").get(ro) {
            Some(t) => t.elapsed() < self.deaf_window,
            None => false,
        }
    }

    fn encode(&self, assignment: &MidiAssignment, data: &Data, command: u8, channel: u8) -> Vec<u8> {
        let status_nibble: u8 = match assignment.kind {
            MidiAssignmentKind::NoteOn => 0x9,
            MidiAssignmentKind::NoteOff => 0x8,
            MidiAssignmentKind::ControlChange => 0xB,
            MidiAssignmentKind::ProgramChange => 0xC,
            MidiAssignmentKind::PitchBend => 0xE,
            MidiAssignmentKind::Aftertouch => 0xA,
            MidiAssignmentKind::ChannelPressure => 0xD,
        };
        let status = (status_nibble << 4) | (channel & 0x0F);
        let value_byte = match assignment.value_range {
            Some(range) => {
                let v = data.as_float().unwrap_or(0.0);
                (range.normalize(v) * 127.0).round().clamp(0.0, 127.0) as u8
            }
            None => data.as_int().unwrap_or(0).clamp(0, 127) as u8,
        };
        match assignment.kind {
            MidiAssignmentKind::ProgramChange | MidiAssignmentKind::ChannelPressure => {
                vec![status, command]
            }
            _ => vec![status, command, value_byte],
        }
    }
}

impl ProtocolProcessor for MidiProcessor {
    fn id(&self) -> ProtocolId {
        self.common.id
    }

    fn role(&self) -> Role {
        self.common.role
    }

    fn processor_type(&self) -> &'static str {
        "MIDI"
    }

    fn start(&mut self) -> bool {
        if let Some(name) = &self.output_device_name {
            let Ok(midi_out) = MidiOutput::new(&format!("bridge-out-{}", self.common.id)) else {
                return false;
            };
            let port = midi_out.ports().into_iter().find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| &n == name)
                    .unwrap_or(false)
            });
            let Some(port) = port else {
                crate::log_error!(None, "MIDI output device '{}' not found", name);
                return false;
            };
            match midi_out.connect(&port, "bridge-out") {
                Ok(conn) => self.output = Some(conn),
                Err(e) => {
                    crate::log_error!(None, "MIDI connect failed: {}", e);
                    return false;
                }
            }
        }
        true
    }

    fn stop(&mut self) -> bool {
        self.output = None;
        true
    }

    fn send_remote_object_message(
        &mut self,
        roi: Roi,
        data: &Data,
        _external_id: Option<ProtocolId>,
    ) -> bool {
        let Some(assignment) = self.assignments.iter().find(|a| a.roi == roi).cloned() else {
            return false;
        };
        let ro = RemoteObject::new(roi, data.addressing);
        if self.common.is_muted(&ro) || self.within_deaf_window(&ro) {
            return true;
        }
        let command = assignment.command_range.map(|(lo, _)| lo).unwrap_or(0);
        let bytes = self.encode(&assignment, data, command, assignment.channel);
        match &mut self.output {
            Some(conn) => conn.send(&bytes).is_ok(),
            None => false,
        }
    }
}
