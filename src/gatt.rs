//! Encoders for re-broadcasting status as standard Bluetooth characteristics.
//!
//! All values are little-endian. Out-of-range inputs are truncated to the
//! field width rather than rejected, which is what connected head units
//! have always received.

use bytes::Bytes;
use tracing::trace;
use uuid::Uuid;

use crate::{
    status::StatusUpdate,
    types::{BikeStatus, Field},
};

/// Bosch eBike status service
pub const BOSCH_STATUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0010_eaa2_11e9_81b4_2a2a_e2db_cce4);

/// Bosch eBike status characteristic (notify)
pub const BOSCH_STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_0011_eaa2_11e9_81b4_2a2a_e2db_cce4);

/// Cycling Power service
pub const CYCLING_POWER_SERVICE_UUID: Uuid = bluetooth_uuid(0x1814);

/// Cycling Speed and Cadence service
pub const CSC_SERVICE_UUID: Uuid = bluetooth_uuid(0x1816);

/// Custom eBike data service
pub const EBIKE_DATA_SERVICE_UUID: Uuid = bluetooth_uuid(0x18F0);

/// CSC measurement flag: crank revolution data present
pub const CSC_FLAG_CRANK_DATA: u8 = 0x02;

/// Cycling Power Feature bits advertised to head units (crank revolutions)
pub const CYCLING_POWER_FEATURES: u16 = 0x0002;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
#[must_use]
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Characteristics produced for re-broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Cycling Power Measurement (0x2A63)
    CyclingPowerMeasurement,
    /// Cycling Power Feature (0x2A65), read only with a fixed value
    CyclingPowerFeature,
    /// CSC Measurement (0x2A5B)
    CscMeasurement,
    /// eBike speed and cadence (0x2AF1)
    EbikeSpeedCadence,
    /// eBike battery (0x2AF2)
    EbikeBattery,
    /// eBike assist mode (0x2AF3)
    EbikeAssistMode,
}

impl Characteristic {
    /// Characteristic UUID
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::CyclingPowerMeasurement => bluetooth_uuid(0x2A63),
            Self::CyclingPowerFeature => bluetooth_uuid(0x2A65),
            Self::CscMeasurement => bluetooth_uuid(0x2A5B),
            Self::EbikeSpeedCadence => bluetooth_uuid(0x2AF1),
            Self::EbikeBattery => bluetooth_uuid(0x2AF2),
            Self::EbikeAssistMode => bluetooth_uuid(0x2AF3),
        }
    }

    /// UUID of the service the characteristic lives in
    #[must_use]
    pub const fn service_uuid(self) -> Uuid {
        match self {
            Self::CyclingPowerMeasurement | Self::CyclingPowerFeature => {
                CYCLING_POWER_SERVICE_UUID
            }
            Self::CscMeasurement => CSC_SERVICE_UUID,
            Self::EbikeSpeedCadence | Self::EbikeBattery | Self::EbikeAssistMode => {
                EBIKE_DATA_SERVICE_UUID
            }
        }
    }

    /// Whether the value is pushed with notifications
    #[must_use]
    pub const fn notifies(self) -> bool {
        !matches!(self, Self::CyclingPowerFeature)
    }
}

/// Encoded value ready to notify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicUpdate {
    /// Target characteristic
    pub characteristic: Characteristic,
    /// Encoded value
    pub value: Bytes,
}

/// Cycling Power Measurement: flags (u16, 0) and instantaneous power (i16)
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_power(watts: i32) -> [u8; 4] {
    let power = (watts as i16).to_le_bytes();
    [0x00, 0x00, power[0], power[1]]
}

/// Cycling Power Feature value
#[must_use]
pub const fn encode_power_feature() -> [u8; 2] {
    CYCLING_POWER_FEATURES.to_le_bytes()
}

/// eBike speed and cadence: speed * 100 (i16) and cadence (i16)
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn encode_speed_cadence(kmh: f64, rpm: u32) -> [u8; 4] {
    let speed = ((kmh * 100.0) as i32 as i16).to_le_bytes();
    let cadence = (rpm as i16).to_le_bytes();
    [speed[0], speed[1], cadence[0], cadence[1]]
}

/// eBike battery percent as a single byte
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn encode_battery(percent: i32) -> [u8; 1] {
    [percent as u8]
}

/// eBike assist level as a single byte
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn encode_assist(mode: i32) -> [u8; 1] {
    [mode as u8]
}

/// Running crank state behind the CSC Measurement characteristic
///
/// The bike only reports cadence, so revolutions and event times are
/// synthesized from cadence and wall-clock time between observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CscState {
    cumulative_crank_revs: u32,
    last_event_time_1024: u16,
    last_timestamp_ms: Option<u64>,
    last_rpm: u32,
    partial_revs: f64,
    partial_ticks: u64,
}

impl CscState {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total crank revolutions since the last reset
    #[must_use]
    pub const fn cumulative_crank_revs(&self) -> u32 {
        self.cumulative_crank_revs
    }

    /// Last crank event time in 1/1024 s, wrapping
    #[must_use]
    pub const fn last_event_time_1024(&self) -> u16 {
        self.last_event_time_1024
    }

    /// Timestamp of the previous cadence observation
    #[must_use]
    pub const fn last_timestamp_ms(&self) -> Option<u64> {
        self.last_timestamp_ms
    }

    /// Cadence recorded by the previous observation
    #[must_use]
    pub const fn last_rpm(&self) -> u32 {
        self.last_rpm
    }

    /// Record a new cadence observation
    ///
    /// The time since the previous observation is credited at the cadence
    /// that was in effect then; `rpm` applies from `now_ms` on. `now_ms` must
    /// come from a monotonic clock. The first call only records the timestamp.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn update(&mut self, rpm: u32, now_ms: u64) {
        let previous_rpm = std::mem::replace(&mut self.last_rpm, rpm);
        let Some(last) = self.last_timestamp_ms.replace(now_ms) else {
            return;
        };
        let elapsed_ms = now_ms.saturating_sub(last);

        let ticks = elapsed_ms * 1024 + self.partial_ticks;
        self.partial_ticks = ticks % 1000;
        self.last_event_time_1024 = self
            .last_event_time_1024
            .wrapping_add((ticks / 1000) as u16);

        let revs = f64::from(previous_rpm) * elapsed_ms as f64 / 60_000.0 + self.partial_revs;
        let whole = revs.floor();
        self.partial_revs = revs - whole;
        self.cumulative_crank_revs = self.cumulative_crank_revs.wrapping_add(whole as u32);

        trace!(
            "CSC: {} revs, event time {}",
            self.cumulative_crank_revs,
            self.last_event_time_1024
        );
    }

    /// CSC Measurement: flags, cumulative crank revs (u16), event time (u16)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn encode(&self) -> [u8; 5] {
        let revs = (self.cumulative_crank_revs as u16).to_le_bytes();
        let time = self.last_event_time_1024.to_le_bytes();
        [CSC_FLAG_CRANK_DATA, revs[0], revs[1], time[0], time[1]]
    }

    /// Forget all accumulated revolutions
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Turns status updates into characteristic notifications
#[derive(Debug, Clone, Default)]
pub struct Rebroadcaster {
    csc: CscState,
}

impl Rebroadcaster {
    /// Create a re-broadcaster with empty crank state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Crank state driving the CSC characteristic
    #[must_use]
    pub const fn csc(&self) -> &CscState {
        &self.csc
    }

    /// Characteristics affected by `update`, encoded from its final snapshot
    ///
    /// Each characteristic appears once, in the order its first field changed.
    /// Motor power and lifetime totals have no standard characteristic.
    pub fn updates_for(&mut self, update: &StatusUpdate, now_ms: u64) -> Vec<CharacteristicUpdate> {
        let mut targets: Vec<Characteristic> = Vec::new();
        let mut push = |c: Characteristic| {
            if !targets.contains(&c) {
                targets.push(c);
            }
        };

        for field in &update.changed {
            match field {
                Field::Cadence => {
                    push(Characteristic::EbikeSpeedCadence);
                    push(Characteristic::CscMeasurement);
                }
                Field::Speed => push(Characteristic::EbikeSpeedCadence),
                Field::HumanPower => push(Characteristic::CyclingPowerMeasurement),
                Field::Battery => push(Characteristic::EbikeBattery),
                Field::AssistMode => push(Characteristic::EbikeAssistMode),
                Field::MotorPower | Field::TotalDistance | Field::TotalBattery => {}
            }
        }

        if targets.contains(&Characteristic::CscMeasurement) {
            self.csc.update(update.status.cadence, now_ms);
        }

        targets
            .into_iter()
            .map(|characteristic| CharacteristicUpdate {
                characteristic,
                value: self.encode(characteristic, &update.status),
            })
            .collect()
    }

    /// Encode the current value of one characteristic
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn encode(&self, characteristic: Characteristic, status: &BikeStatus) -> Bytes {
        match characteristic {
            Characteristic::CyclingPowerMeasurement => {
                Bytes::copy_from_slice(&encode_power(status.human_power as i32))
            }
            Characteristic::CyclingPowerFeature => {
                Bytes::copy_from_slice(&encode_power_feature())
            }
            Characteristic::CscMeasurement => Bytes::copy_from_slice(&self.csc.encode()),
            Characteristic::EbikeSpeedCadence => {
                Bytes::copy_from_slice(&encode_speed_cadence(status.speed, status.cadence))
            }
            Characteristic::EbikeBattery => {
                Bytes::copy_from_slice(&encode_battery(i32::from(status.battery)))
            }
            Characteristic::EbikeAssistMode => {
                Bytes::copy_from_slice(&encode_assist(i32::from(status.assist_mode.level())))
            }
        }
    }

    /// Reset crank state for a new connection
    pub fn reset(&mut self) {
        self.csc.reset();
    }
}
