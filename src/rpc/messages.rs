//! Request/response message types for the serial command interface.
//!
//! Payloads are encoded with the crate's compact binary codec (postcard);
//! the framing around them is in [`super::codec`]. Responses mirror requests
//! through a correlation `id` and carry either a result body or an error
//! body; unsolicited error responses use `id = 0`.

use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

use crate::manager::TankReading;
use crate::source::WaterSource;
use crate::tank::WaterTank;
use crate::{Error, MAX_WATER_SOURCES, MAX_WATER_TANKS, Name, Severity};

/// Maximum wire length of an error message.
pub const MAX_ERROR_LENGTH: usize = 100;

/// Maximum wire length of an error argument (an entity name).
pub const MAX_ERROR_ARG_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u32,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    CreateWaterSource {
        name: Name,
        pin: u16,
        water_tank_name: Option<Name>,
    },
    CreateWaterTank {
        name: Name,
        pressure_sensor_pin: u16,
        volume_factor: f32,
        pressure_factor: f32,
        pressure_changing_value: f32,
        minimum_volume: f32,
        max_volume: f32,
        zero_volume_pressure: f32,
        water_source_name: Option<Name>,
    },
    RemoveWaterSource {
        water_source_name: Name,
    },
    RemoveWaterTank {
        water_tank_name: Name,
    },
    SetWaterSourceState {
        water_source_name: Name,
        state: bool,
        force: bool,
    },
    SetWaterSourceActive {
        water_source_name: Name,
        active: bool,
    },
    SetWaterTankMinimumVolume {
        water_tank_name: Name,
        value: f32,
    },
    SetWaterTankMaxVolume {
        water_tank_name: Name,
        value: f32,
    },
    SetWaterTankZeroVolume {
        water_tank_name: Name,
        value: f32,
    },
    SetWaterTankVolumeFactor {
        water_tank_name: Name,
        value: f32,
    },
    SetWaterTankPressureFactor {
        water_tank_name: Name,
        value: f32,
    },
    SetWaterTankPressureChangingValue {
        water_tank_name: Name,
        value: f32,
    },
    SetWaterTankActive {
        water_tank_name: Name,
        active: bool,
    },
    FillWaterTank {
        water_tank_name: Name,
        enabled: bool,
        force: bool,
    },
    SetMode {
        mode: u8,
    },
    GetMode,
    GetWaterSource {
        name: Name,
    },
    GetWaterTank {
        name: Name,
    },
    GetWaterSourceList,
    GetWaterTankList,
    Save,
    Reset,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Ok,
    Mode(u8),
    WaterSource(WaterSourceState),
    WaterTank(WaterTankState),
    WaterSourceList(Vec<Name, MAX_WATER_SOURCES>),
    WaterTankList(Vec<Name, MAX_WATER_TANKS>),
    Error(ErrorBody),
}

/// Read-back of one registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterSourceState {
    pub pin: u16,
    pub active: bool,
    pub turned_on: bool,
    pub water_tank_name: Option<Name>,
}

/// Read-back of one registered tank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterTankState {
    pub pressure_sensor_pin: u16,
    pub pressure: f32,
    pub volume: f32,
    pub volume_factor: f32,
    pub pressure_factor: f32,
    pub pressure_changing_value: f32,
    pub minimum_volume: f32,
    pub max_volume: f32,
    pub zero_volume_pressure: f32,
    pub active: bool,
    pub filling: bool,
    pub water_source_name: Option<Name>,
}

/// Wire error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Exception,
    RuntimeError,
    InvalidRequest,
}

impl From<Severity> for ErrorClass {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Generic => Self::Exception,
            Severity::Runtime => Self::RuntimeError,
            Severity::InvalidRequest => Self::InvalidRequest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub class: ErrorClass,
    pub message: String<MAX_ERROR_LENGTH>,
    pub arg: String<MAX_ERROR_ARG_LENGTH>,
}

impl ErrorBody {
    pub fn new(error: Error, arg: &str) -> Self {
        let mut message = String::new();
        let _ = message.push_str(error.message());
        let mut arg_buf = String::new();
        let _ = arg_buf.push_str(arg);
        Self {
            class: error.severity().into(),
            message,
            arg: arg_buf,
        }
    }
}

// ---------------------------------------------------------------------------
// State assembly helpers
// ---------------------------------------------------------------------------

impl WaterSourceState {
    pub fn assemble(source: &WaterSource, turned_on: bool) -> Self {
        Self {
            pin: source.pin(),
            active: source.is_active(),
            turned_on,
            water_tank_name: source.supply_tank().and_then(|name| Name::try_from(name).ok()),
        }
    }
}

impl WaterTankState {
    pub fn assemble(tank: &WaterTank, reading: TankReading) -> Self {
        let params = tank.params();
        Self {
            pressure_sensor_pin: tank.sensor_pin(),
            pressure: reading.pressure,
            volume: reading.volume,
            volume_factor: params.volume_factor,
            pressure_factor: params.pressure_factor,
            pressure_changing_value: params.pressure_changing_value,
            minimum_volume: params.minimum_volume,
            max_volume: params.max_volume,
            zero_volume_pressure: params.zero_volume_pressure,
            active: tank.is_active(),
            filling: reading.filling,
            water_source_name: tank.source().and_then(|name| Name::try_from(name).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_postcard() {
        let request = Request {
            id: 7,
            body: RequestBody::CreateWaterSource {
                name: Name::try_from("garden-pump").unwrap(),
                pin: 7,
                water_tank_name: Some(Name::try_from("street").unwrap()),
            },
        };
        let mut buf = [0u8; 128];
        let used = postcard::to_slice(&request, &mut buf).unwrap().len();
        let decoded: Request = postcard::from_bytes(&buf[..used]).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn error_body_truncates_nothing_for_wire_messages() {
        let body = ErrorBody::new(Error::WaterTankNotFound, "T1");
        assert_eq!(body.class, ErrorClass::InvalidRequest);
        assert_eq!(body.message.as_str(), Error::WaterTankNotFound.message());
        assert_eq!(body.arg.as_str(), "T1");
    }
}
