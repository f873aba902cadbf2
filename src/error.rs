//! Unified error types for the cistern firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! dispatcher's response path uniform. All variants are `Copy` so they can be
//! slotted per tank and rotated without allocation. Each variant carries a
//! fixed wire message (≤100 bytes) and a [`Severity`] that maps onto the
//! serial protocol's error types.

use core::fmt;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How an error reached the caller.
///
/// `Runtime` denotes a background fault observed during the control loop;
/// `InvalidRequest` denotes a rejected command; `Generic` covers everything
/// else (persistence and framing failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Generic,
    Runtime,
    InvalidRequest,
}

// ---------------------------------------------------------------------------
// Runtime faults
// ---------------------------------------------------------------------------

/// Background faults produced by the tank state machine.
///
/// Exactly one fault is slotted per tank between control-loop iterations;
/// the manager rotates them onto the serial link at a bounded rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Pressure never started moving after a fill was ordered.
    NotFilling,
    /// Pressure was moving, then froze for the changing interval.
    StoppedFilling,
    /// Pressure frozen past the hard limit; the tank was deactivated.
    NotFillingTimeout,
}

impl Fault {
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotFilling => "The water tank is not filling",
            Self::StoppedFilling => "The water tank has stopped to fill",
            Self::NotFillingTimeout => "The water tank deactivated. It has stopped to fill",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    WaterSourceNotFound,
    WaterTankNotFound,
    WaterSourceAlreadyRegistered,
    WaterTankAlreadyRegistered,
    MaxWaterSources,
    MaxWaterTanks,
    ResourceNameEmpty,
    ResourceNameTooLong,
    CannotHandleWaterSourceInAuto,
    CannotHandleWaterTankInAuto,
    CannotEnableWaterSourceDueMinimumVolume,
    CannotTurnOnDeactivatedWaterSource,
    CannotFillWaterTankWithoutWaterSource,
    CannotFillWaterTankMaxVolume,
    CannotFillDeactivatedWaterTank,
    CannotRemoveWaterSourceDependency,
    CannotRemoveWaterTankDependency,
    InvalidOperationMode,
    InvalidTankParameters,
    PinNotFound,
    PinTableFull,
    /// A frame payload failed to decode.
    MalformedRequest,
    /// A partial frame timed out on the serial link.
    TruncatedMessage,
    FailedToSave,
    SaveCorrupted,
    /// A background fault surfaced through the rotation path.
    Fault(Fault),
}

impl Error {
    pub const fn severity(self) -> Severity {
        match self {
            Self::Fault(_) => Severity::Runtime,
            Self::TruncatedMessage | Self::FailedToSave | Self::SaveCorrupted | Self::PinTableFull => {
                Severity::Generic
            }
            _ => Severity::InvalidRequest,
        }
    }

    /// Fixed wire message, guaranteed ≤100 bytes.
    pub const fn message(self) -> &'static str {
        match self {
            Self::WaterSourceNotFound => "Could not find a water source with the name provided",
            Self::WaterTankNotFound => "Could not find a water tank with the name provided",
            Self::WaterSourceAlreadyRegistered => {
                "There is already a water source with that name registered"
            }
            Self::WaterTankAlreadyRegistered => {
                "There is already a water tank with that name registered"
            }
            Self::MaxWaterSources => "Max of water sources reached",
            Self::MaxWaterTanks => "Max of water tanks reached",
            Self::ResourceNameEmpty => "Cannot create a resource with an empty name",
            Self::ResourceNameTooLong => "Resource names are limited to 20 characters",
            Self::CannotHandleWaterSourceInAuto => "Cannot handle a water source in auto mode",
            Self::CannotHandleWaterTankInAuto => "Cannot handle a water tank in auto mode",
            Self::CannotEnableWaterSourceDueMinimumVolume => {
                "Cannot open a water source, the underlying water tank is under the minimum threshold"
            }
            Self::CannotTurnOnDeactivatedWaterSource => {
                "Cannot turn on a deactivated water source"
            }
            Self::CannotFillWaterTankWithoutWaterSource => {
                "Cannot fill a water tank without setting a water source for it"
            }
            Self::CannotFillWaterTankMaxVolume => {
                "Cannot fill the water tank, maximum threshold reached"
            }
            Self::CannotFillDeactivatedWaterTank => "Cannot fill a deactivated water tank",
            Self::CannotRemoveWaterSourceDependency => {
                "Cannot remove the water source, there is a water tank dependent of it"
            }
            Self::CannotRemoveWaterTankDependency => {
                "Cannot remove the water tank, there is a water source dependent of it"
            }
            Self::InvalidOperationMode => "Invalid operation mode",
            Self::InvalidTankParameters => "Invalid water tank thresholds",
            Self::PinNotFound => "Pin is not registered in the IO table",
            Self::PinTableFull => "IO table is full",
            Self::MalformedRequest => "Failed to decode the request",
            Self::TruncatedMessage => "Truncated message received",
            Self::FailedToSave => "Failed to persist the configuration",
            Self::SaveCorrupted => "The persisted configuration is corrupted",
            Self::Fault(fault) => fault.message(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
