//! `RemoteObjectIdentifier` (ROI) — the closed enumeration of bridgeable
//! parameter kinds (spec.md §3). Not every historical variant of the source
//! protocol dialect is reproduced one-for-one; every *category* spec.md
//! names is represented, with per-zone/per-channel multiplicities collapsed
//! into the addressing pair rather than the enum (see `RemoteObjectAddressing`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum RemoteObjectIdentifier {
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

    /// Sentinel: ids at or above this value are internal-only and never
    /// forwarded across a Node boundary (spec.md §3, §4.4). The internal
    /// selection helpers below it are therefore all internal-only except
    /// `GetAllKnownValues`, which the Node worker loop treats as a
    /// deliberate exception (spec.md §4.4).
    BridgingMAX,

    MatrixInput_Select,
    SoundObjectSelect,
    GetAllKnownValues,
}

use RemoteObjectIdentifier::*;

impl RemoteObjectIdentifier {
    /// Whether this ROI carries a meaningful channel/source index in
    /// `RemoteObjectAddressing::first` (spec.md §3).
    pub fn is_channel_addressing(self) -> bool {
        !matches!(
            self,
            HeartbeatPing
                | HeartbeatPong
                | DeviceStatus
                | DeviceErrorText
                | Scene_Index
                | Scene_Name
                | Scene_Comment
                | Scene_Recall
                | Scene_Next
                | Scene_Previous
                | BridgingMAX
                | GetAllKnownValues
        )
    }

    /// Whether this ROI carries a meaningful record/mapping-area index in
    /// `RemoteObjectAddressing::second` (spec.md §3).
    pub fn is_record_addressing(self) -> bool {
        matches!(
            self,
            CoordinateMapping_SourcePosition_XYZ
                | CoordinateMapping_SourcePosition_XY
                | CoordinateMapping_SourcePosition_X
                | CoordinateMapping_SourcePosition_Y
                | CoordinateMappingSettings_P1Real
                | CoordinateMappingSettings_P2Real
                | CoordinateMappingSettings_P3Real
                | CoordinateMappingSettings_P4Real
                | CoordinateMappingSettings_P1Virtual
                | CoordinateMappingSettings_P2Virtual
                | CoordinateMappingSettings_Flip
                | CoordinateMappingSettings_Name
        )
    }

    /// True for ids at/after the bridging boundary that may still travel
    /// through a Node's inbound queue as internal requests (spec.md §4.4:
    /// "drop unless it is the internal `GetAllKnownValues`").
    pub fn is_internal_only(self) -> bool {
        self >= BridgingMAX && self != GetAllKnownValues
    }

    /// The XYZ/XY/X/Y position family this ROI belongs to, if any
    /// (spec.md §4.3 "positioning ROIs ... keeps subscribers ... coherent").
    pub fn position_family(self) -> Option<PositionFamily> {
        match self {
            SourcePosition_XYZ | SourcePosition_XY | SourcePosition_X | SourcePosition_Y => {
                Some(PositionFamily::SourcePosition)
            }
            CoordinateMapping_SourcePosition_XYZ
            | CoordinateMapping_SourcePosition_XY
            | CoordinateMapping_SourcePosition_X
            | CoordinateMapping_SourcePosition_Y => Some(PositionFamily::CoordinateMappingSourcePosition),
            _ => None,
        }
    }

    pub fn position_variant(self) -> Option<PositionVariant> {
        match self {
            SourcePosition_XYZ | CoordinateMapping_SourcePosition_XYZ => Some(PositionVariant::Xyz),
            SourcePosition_XY | CoordinateMapping_SourcePosition_XY => Some(PositionVariant::Xy),
            SourcePosition_X | CoordinateMapping_SourcePosition_X => Some(PositionVariant::X),
            SourcePosition_Y | CoordinateMapping_SourcePosition_Y => Some(PositionVariant::Y),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionFamily {
    SourcePosition,
    CoordinateMappingSourcePosition,
}

impl PositionFamily {
    pub fn variant(self, v: PositionVariant) -> RemoteObjectIdentifier {
        match (self, v) {
            (PositionFamily::SourcePosition, PositionVariant::Xyz) => SourcePosition_XYZ,
            (PositionFamily::SourcePosition, PositionVariant::Xy) => SourcePosition_XY,
            (PositionFamily::SourcePosition, PositionVariant::X) => SourcePosition_X,
            (PositionFamily::SourcePosition, PositionVariant::Y) => SourcePosition_Y,
            (PositionFamily::CoordinateMappingSourcePosition, PositionVariant::Xyz) => {
                CoordinateMapping_SourcePosition_XYZ
            }
            (PositionFamily::CoordinateMappingSourcePosition, PositionVariant::Xy) => {
                CoordinateMapping_SourcePosition_XY
            }
            (PositionFamily::CoordinateMappingSourcePosition, PositionVariant::X) => {
                CoordinateMapping_SourcePosition_X
            }
            (PositionFamily::CoordinateMappingSourcePosition, PositionVariant::Y) => {
                CoordinateMapping_SourcePosition_Y
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionVariant {
    Xyz,
    Xy,
    X,
    Y,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_not_channel_addressing() {
        assert!(!HeartbeatPing.is_channel_addressing());
        assert!(!HeartbeatPing.is_record_addressing());
    }

    #[test]
    fn matrix_input_is_channel_but_not_record_addressing() {
        assert!(MatrixInput_Mute.is_channel_addressing());
        assert!(!MatrixInput_Mute.is_record_addressing());
    }

    #[test]
    fn coordinate_mapping_is_channel_and_record_addressing() {
        assert!(CoordinateMapping_SourcePosition_XYZ.is_channel_addressing());
        assert!(CoordinateMapping_SourcePosition_XYZ.is_record_addressing());
    }

    #[test]
    fn bridging_max_is_internal_only_but_get_all_known_values_is_not() {
        assert!(BridgingMAX.is_internal_only());
        assert!(!GetAllKnownValues.is_internal_only());
    }

    #[test]
    fn position_family_round_trips() {
        let fam = CoordinateMapping_SourcePosition_X.position_family().unwrap();
        let variant = CoordinateMapping_SourcePosition_X.position_variant().unwrap();
        assert_eq!(fam.variant(variant), CoordinateMapping_SourcePosition_X);
    }
}
