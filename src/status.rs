//! Folding decoded messages into the current [`BikeStatus`].

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::{
    protocol::Message,
    types::{AssistMode, BikeStatus, Field, FirmwareProfile, MAX_ASSIST_LEVEL},
};

/// Raised when the battery level changes after a known non-zero reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryAlert {
    /// Last observed level
    pub previous: u8,
    /// New level
    pub current: u8,
}

impl BatteryAlert {
    /// Text for a user-facing notification
    #[must_use]
    pub fn message(&self) -> String {
        format!("Battery: {}%", self.current)
    }
}

/// Result of folding one batch of messages
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Snapshot after the batch
    pub status: BikeStatus,
    /// One line per message, in order
    pub summary: String,
    /// Fields written by the batch, in order, with repeats
    pub changed: Vec<Field>,
    /// Battery alerts raised by the batch
    pub battery_alerts: Vec<BatteryAlert>,
}

impl StatusUpdate {
    /// Whether any known field was written
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Fold `messages` into a copy of `status`
///
/// Unknown IDs are listed in the summary and otherwise ignored. The previous
/// battery value is taken from `status`, so a freshly reset snapshot never
/// alerts on its first battery reading.
#[must_use]
pub fn apply(profile: &FirmwareProfile, status: &BikeStatus, messages: &[Message]) -> StatusUpdate {
    let mut next = status.clone();
    let mut lines = Vec::with_capacity(messages.len());
    let mut changed = Vec::new();
    let mut battery_alerts = Vec::new();

    for message in messages {
        let Some(field) = profile.field_for(message.id) else {
            debug!("Unknown message ID 0x{:04X}", message.id);
            lines.push(format!("Unknown ID 0x{:04X}: {}", message.id, message.value));
            continue;
        };

        let mut line = format!("{}: ", field.label());
        let value = message.value;

        match field {
            Field::Cadence => {
                next.cadence = non_negative(value / 2);
                let _ = write!(line, "{}", next.cadence);
            }
            Field::HumanPower => {
                next.human_power = non_negative(value);
                let _ = write!(line, "{}", next.human_power);
            }
            Field::MotorPower => {
                next.motor_power = non_negative(value);
                let _ = write!(line, "{}", next.motor_power);
            }
            Field::Speed => {
                next.speed = (f64::from(value) / 100.0).max(0.0);
                let _ = write!(line, "{:.1}", next.speed);
            }
            Field::Battery => {
                let battery = clamp_u8(value, 100);
                if battery != next.battery && next.battery != 0 {
                    info!("Battery changed: {}% -> {}%", next.battery, battery);
                    battery_alerts.push(BatteryAlert {
                        previous: next.battery,
                        current: battery,
                    });
                }
                next.battery = battery;
                let _ = write!(line, "{battery}");
            }
            Field::AssistMode => {
                next.assist_mode = AssistMode::from(clamp_u8(value, MAX_ASSIST_LEVEL));
                let _ = write!(line, "{}", next.assist_mode);
            }
            Field::TotalDistance => {
                next.total_distance = (f64::from(value) / 1000.0).max(0.0);
                let _ = write!(line, "{:.3}", next.total_distance);
            }
            Field::TotalBattery => {
                next.total_battery = (f64::from(value) / 1000.0).max(0.0);
                let _ = write!(line, "{:.3}", next.total_battery);
            }
        }

        line.push_str(field.unit());
        lines.push(line);
        changed.push(field);
    }

    StatusUpdate {
        status: next,
        summary: lines.join("\n"),
        changed,
        battery_alerts,
    }
}

#[allow(clippy::cast_sign_loss)]
const fn non_negative(value: i32) -> u32 {
    if value < 0 {
        0
    } else {
        value as u32
    }
}

#[allow(clippy::cast_sign_loss)]
fn clamp_u8(value: i32, max: u8) -> u8 {
    value.clamp(0, i32::from(max)) as u8
}

/// Owns the snapshot for one connection
#[derive(Debug, Clone, Default)]
pub struct StatusAggregator {
    profile: FirmwareProfile,
    status: BikeStatus,
}

impl StatusAggregator {
    /// Create an aggregator with default status
    #[must_use]
    pub fn new(profile: FirmwareProfile) -> Self {
        Self {
            profile,
            status: BikeStatus::default(),
        }
    }

    /// Current snapshot
    #[must_use]
    pub const fn status(&self) -> &BikeStatus {
        &self.status
    }

    /// Message ID table in use
    #[must_use]
    pub const fn profile(&self) -> &FirmwareProfile {
        &self.profile
    }

    /// Fold a batch into the snapshot
    pub fn apply(&mut self, messages: &[Message]) -> StatusUpdate {
        let update = apply(&self.profile, &self.status, messages);
        self.status = update.status.clone();
        update
    }

    /// Drop everything learned since the last connection
    pub fn reset(&mut self) -> &BikeStatus {
        debug!("Resetting bike status");
        self.status = BikeStatus::default();
        &self.status
    }
}
