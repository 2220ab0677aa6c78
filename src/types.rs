use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

use crate::{
    error::{EbikeError, Result},
    protocol::{
        ID_ASSIST_MODE, ID_BATTERY, ID_BATTERY_EXTENDED, ID_CADENCE, ID_HUMAN_POWER,
        ID_MOTOR_POWER, ID_SPEED, ID_TOTAL_BATTERY, ID_TOTAL_DISTANCE,
    },
};

/// Highest assist level the drive unit reports
pub const MAX_ASSIST_LEVEL: u8 = 10;

/// Motor assistance level selected on the bike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AssistMode {
    /// No assistance
    #[default]
    Off,
    /// Eco level
    Eco,
    /// Tour level
    Tour,
    /// Sport level
    Sport,
    /// Turbo level
    Turbo,
    /// Levels above Turbo reported by newer drive units
    Extended(u8),
}

impl From<u8> for AssistMode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::Eco,
            2 => Self::Tour,
            3 => Self::Sport,
            4 => Self::Turbo,
            n => Self::Extended(n),
        }
    }
}

impl AssistMode {
    /// Raw level as reported on the wire
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Eco => 1,
            Self::Tour => 2,
            Self::Sport => 3,
            Self::Turbo => 4,
            Self::Extended(n) => n,
        }
    }
}

impl fmt::Display for AssistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "Off"),
            Self::Eco => write!(f, "Eco"),
            Self::Tour => write!(f, "Tour"),
            Self::Sport => write!(f, "Sport"),
            Self::Turbo => write!(f, "Turbo"),
            Self::Extended(n) => write!(f, "Mode {n}"),
        }
    }
}

/// Current status snapshot of the bike
///
/// Every field holds the latest value received for it. Fields that have not
/// been observed since the last reset keep their default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BikeStatus {
    /// Pedal cadence in RPM
    pub cadence: u32,
    /// Rider power in watts
    pub human_power: u32,
    /// Motor power in watts
    pub motor_power: u32,
    /// Speed in km/h
    pub speed: f64,
    /// Battery state of charge in percent (0-100)
    pub battery: u8,
    /// Selected assist mode
    pub assist_mode: AssistMode,
    /// Odometer in km
    pub total_distance: f64,
    /// Lifetime battery energy delivered in kWh
    pub total_battery: f64,
}

/// Telemetry field a message ID can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Pedal cadence
    Cadence,
    /// Rider power
    HumanPower,
    /// Motor power
    MotorPower,
    /// Speed
    Speed,
    /// Battery percentage
    Battery,
    /// Assist mode
    AssistMode,
    /// Odometer
    TotalDistance,
    /// Lifetime battery energy
    TotalBattery,
}

impl Field {
    /// Human-readable label used in summaries
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cadence => "Cadence",
            Self::HumanPower => "Human Power",
            Self::MotorPower => "Motor Power",
            Self::Speed => "Speed",
            Self::Battery => "Battery",
            Self::AssistMode => "Assist Mode",
            Self::TotalDistance => "Total Distance",
            Self::TotalBattery => "Total Battery",
        }
    }

    /// Unit suffix used in summaries
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Cadence => " RPM",
            Self::HumanPower | Self::MotorPower => "W",
            Self::Speed => " km/h",
            Self::Battery => "%",
            Self::AssistMode => "",
            Self::TotalDistance => " km",
            Self::TotalBattery => " kWh",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Value used for frames whose data type carries no known encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadFallback {
    /// Report zero
    #[default]
    Zero,
    /// Report the first payload byte, as some firmware builds expect
    FirstByte,
}

/// Message ID table for one drive unit firmware revision
///
/// Firmware revisions disagree on some IDs (battery is 0x8088 on older units
/// and 0x80BC on newer ones), so the table is data rather than code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareProfile {
    /// Profile name for logs
    pub name: String,
    /// Message ID to field mapping
    pub fields: HashMap<u16, Field>,
    /// Decoding of frames with an unknown data type
    #[serde(default)]
    pub payload_fallback: PayloadFallback,
}

impl FirmwareProfile {
    /// Profile for the original status service layout
    #[must_use]
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            fields: HashMap::from([
                (ID_CADENCE, Field::Cadence),
                (ID_HUMAN_POWER, Field::HumanPower),
                (ID_MOTOR_POWER, Field::MotorPower),
                (ID_SPEED, Field::Speed),
                (ID_BATTERY, Field::Battery),
                (ID_ASSIST_MODE, Field::AssistMode),
            ]),
            payload_fallback: PayloadFallback::Zero,
        }
    }

    /// Profile for newer firmware that also reports odometer and energy totals
    #[must_use]
    pub fn extended() -> Self {
        Self {
            name: "extended".to_string(),
            fields: HashMap::from([
                (ID_CADENCE, Field::Cadence),
                (ID_HUMAN_POWER, Field::HumanPower),
                (ID_MOTOR_POWER, Field::MotorPower),
                (ID_SPEED, Field::Speed),
                (ID_BATTERY_EXTENDED, Field::Battery),
                (ID_ASSIST_MODE, Field::AssistMode),
                (ID_TOTAL_DISTANCE, Field::TotalDistance),
                (ID_TOTAL_BATTERY, Field::TotalBattery),
            ]),
            payload_fallback: PayloadFallback::Zero,
        }
    }

    /// Add or replace a mapping
    #[must_use]
    pub fn with_field(mut self, id: u16, field: Field) -> Self {
        self.fields.insert(id, field);
        self
    }

    /// Change the unknown data type policy
    #[must_use]
    pub fn with_payload_fallback(mut self, fallback: PayloadFallback) -> Self {
        self.payload_fallback = fallback;
        self
    }

    /// Look up the field for a message ID
    #[must_use]
    pub fn field_for(&self, id: u16) -> Option<Field> {
        self.fields.get(&id).copied()
    }

    /// Check the profile is usable
    ///
    /// # Errors
    ///
    /// Returns [`EbikeError::InvalidConfig`] if the table is empty.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(EbikeError::InvalidConfig(format!(
                "profile '{}' maps no message IDs",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for FirmwareProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Message ID table
    pub profile: FirmwareProfile,
    /// Produce standard characteristic updates for re-broadcast
    pub rebroadcast: bool,
    /// Capacity of the transport event channel
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: FirmwareProfile::standard(),
            rebroadcast: true,
            channel_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assist_mode_from_u8() {
        assert_eq!(AssistMode::from(0), AssistMode::Off);
        assert_eq!(AssistMode::from(1), AssistMode::Eco);
        assert_eq!(AssistMode::from(4), AssistMode::Turbo);
        assert_eq!(AssistMode::from(7), AssistMode::Extended(7));
        assert_eq!(AssistMode::from(7).level(), 7);
        assert_eq!(AssistMode::Sport.level(), 3);
    }

    #[test]
    fn test_assist_mode_display() {
        assert_eq!(AssistMode::Off.to_string(), "Off");
        assert_eq!(AssistMode::Tour.to_string(), "Tour");
        assert_eq!(AssistMode::Extended(5).to_string(), "Mode 5");
    }

    #[test]
    fn test_bike_status_defaults() {
        let status = BikeStatus::default();
        assert_eq!(status.cadence, 0);
        assert_eq!(status.battery, 0);
        assert_eq!(status.assist_mode, AssistMode::Off);
        assert!(status.speed.abs() < f64::EPSILON);
        assert!(status.total_distance.abs() < f64::EPSILON);
    }

    #[test]
    fn test_profiles_disagree_on_battery_id() {
        let standard = FirmwareProfile::standard();
        let extended = FirmwareProfile::extended();

        assert_eq!(standard.field_for(ID_BATTERY), Some(Field::Battery));
        assert_eq!(standard.field_for(ID_BATTERY_EXTENDED), None);
        assert_eq!(extended.field_for(ID_BATTERY_EXTENDED), Some(Field::Battery));
        assert_eq!(extended.field_for(ID_TOTAL_DISTANCE), Some(Field::TotalDistance));
        assert_eq!(standard.field_for(ID_TOTAL_DISTANCE), None);
    }

    #[test]
    fn test_profile_builder_and_validation() {
        let profile = FirmwareProfile::standard()
            .with_field(ID_BATTERY_EXTENDED, Field::Battery)
            .with_payload_fallback(PayloadFallback::FirstByte);
        assert_eq!(profile.field_for(ID_BATTERY_EXTENDED), Some(Field::Battery));
        assert_eq!(profile.payload_fallback, PayloadFallback::FirstByte);
        assert!(profile.validate().is_ok());

        let empty = FirmwareProfile {
            name: "empty".to_string(),
            fields: HashMap::new(),
            payload_fallback: PayloadFallback::Zero,
        };
        assert!(matches!(empty.validate(), Err(EbikeError::InvalidConfig(_))));
    }

    #[test]
    fn test_profile_from_json() {
        let json = r#"{"name":"custom","fields":{"39002":"Cadence","32956":"Battery"}}"#;
        let profile: FirmwareProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.field_for(0x985A), Some(Field::Cadence));
        assert_eq!(profile.field_for(0x80BC), Some(Field::Battery));
        assert_eq!(profile.payload_fallback, PayloadFallback::Zero);
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert!(config.rebroadcast);
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.profile.name, "standard");
    }
}
