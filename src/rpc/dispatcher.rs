//! Request dispatcher: the firmware's single-task read/process/write cycle.
//!
//! Per [`Dispatcher::poll`] iteration:
//! 1. drain available serial bytes into the frame decoder;
//! 2. decode and apply any completed request, answering with an ok or error
//!    response carrying the request's correlation id;
//! 3. report a partial frame as truncated once it outlives the read timeout;
//! 4. run one manager tick and, if a background fault rotated out of it,
//!    emit an unsolicited error response with id 0.
//!
//! Commands therefore observe the state left by the previous tick, and the
//! tick observes the state left by this iteration's command.

use log::{info, warn};

use crate::config::ControlConfig;
use crate::io::PinBackend;
use crate::manager::{Manager, Mode};
use crate::persist::{NvStorage, Persister};
use crate::rpc::codec::{API_MESSAGE, FrameDecoder, MAX_FRAME_SIZE, encode_frame};
use crate::rpc::messages::{
    ErrorBody, Request, RequestBody, Response, ResponseBody, WaterSourceState, WaterTankState,
};
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Non-blocking byte transport. `read_byte` polls; `can_write` lets the
/// dispatcher drop unsolicited emissions while the output side is congested.
pub trait SerialTransport {
    fn read_byte(&mut self) -> Option<u8>;
    fn write(&mut self, bytes: &[u8]);

    fn can_write(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher<B: PinBackend, S: NvStorage> {
    manager: Manager<B>,
    persister: Persister<S>,
    decoder: FrameDecoder,
    last_read_at: u32,
    read_timeout_ms: u32,
}

impl<B: PinBackend, S: NvStorage> Dispatcher<B, S> {
    pub fn new(manager: Manager<B>, persister: Persister<S>, config: &ControlConfig) -> Self {
        Self {
            manager,
            persister,
            decoder: FrameDecoder::new(),
            last_read_at: 0,
            read_timeout_ms: config.read_timeout_ms,
        }
    }

    pub fn manager(&self) -> &Manager<B> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut Manager<B> {
        &mut self.manager
    }

    pub fn persister(&self) -> &Persister<S> {
        &self.persister
    }

    // ── Boot replay ───────────────────────────────────────────

    /// Rebuild the persisted topology by dispatching the stored records in
    /// order. A corrupt log, an undecodable record, or a rejected request
    /// aborts the replay through the normal error path and clears the log.
    pub fn boot(&mut self, port: &mut impl SerialTransport, now: u32) {
        let total = self.persister.total_requests();
        if total == 0 {
            return;
        }
        if self.persister.is_corrupted() {
            warn!("dispatcher: persisted configuration is corrupted");
            Self::emit_error(port, 0, Error::SaveCorrupted, "");
            self.persister.clear();
            return;
        }
        info!("dispatcher: replaying {total} persisted requests");
        for index in 0..total {
            let outcome = match self.persister.read_request(index) {
                Ok(body) => self.apply(body, now).map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                warn!("dispatcher: replay aborted at record {index}: {err}");
                Self::emit_error(port, 0, err, "");
                self.persister.clear();
                return;
            }
        }
    }

    // ── Poll cycle ────────────────────────────────────────────

    pub fn poll(&mut self, port: &mut impl SerialTransport, now: u32) {
        while let Some(byte) = port.read_byte() {
            self.last_read_at = now;
            if self.decoder.feed(byte) {
                self.handle_frame(port, now);
                self.decoder.reset();
            }
        }

        if self.decoder.is_partial()
            && now.wrapping_sub(self.last_read_at) >= self.read_timeout_ms
        {
            warn!("dispatcher: truncated frame on the serial link");
            Self::emit_error(port, 0, Error::TruncatedMessage, "");
            self.decoder.reset();
        }

        if let Some(alert) = self.manager.tick(now) {
            if port.can_write() {
                Self::emit_error(port, 0, Error::Fault(alert.fault), alert.tank.as_str());
            }
        }
    }

    fn handle_frame(&mut self, port: &mut impl SerialTransport, now: u32) {
        if self.decoder.message_type() != API_MESSAGE {
            warn!(
                "dispatcher: ignoring frame of type {}",
                self.decoder.message_type()
            );
            return;
        }
        let request: Request = match postcard::from_bytes(self.decoder.payload()) {
            Ok(request) => request,
            Err(_) => {
                Self::emit_error(port, 0, Error::MalformedRequest, "");
                return;
            }
        };
        let id = request.id;
        match self.apply(request.body, now) {
            Ok(body) => Self::emit(port, &Response { id, body }),
            Err(err) => Self::emit_error(port, id, err, ""),
        }
    }

    // ── Request routing ───────────────────────────────────────

    fn apply(&mut self, body: RequestBody, now: u32) -> Result<ResponseBody> {
        use RequestBody as R;
        match body {
            R::CreateWaterSource {
                name,
                pin,
                water_tank_name,
            } => {
                self.manager
                    .create_water_source(&name, pin, water_tank_name.as_deref())?;
                Ok(ResponseBody::Ok)
            }
            R::CreateWaterTank {
                name,
                pressure_sensor_pin,
                volume_factor,
                pressure_factor,
                pressure_changing_value,
                minimum_volume,
                max_volume,
                zero_volume_pressure,
                water_source_name,
            } => {
                let params = crate::tank::TankParams {
                    pressure_factor,
                    volume_factor,
                    zero_volume_pressure,
                    pressure_changing_value,
                    minimum_volume,
                    max_volume,
                };
                self.manager.create_water_tank(
                    &name,
                    pressure_sensor_pin,
                    params,
                    water_source_name.as_deref(),
                )?;
                Ok(ResponseBody::Ok)
            }
            R::RemoveWaterSource { water_source_name } => {
                self.manager.remove_water_source(&water_source_name)?;
                Ok(ResponseBody::Ok)
            }
            R::RemoveWaterTank { water_tank_name } => {
                self.manager.remove_water_tank(&water_tank_name)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterSourceState {
                water_source_name,
                state,
                force,
            } => {
                self.manager
                    .set_water_source_state(&water_source_name, state, force)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterSourceActive {
                water_source_name,
                active,
            } => {
                self.manager
                    .set_water_source_active(&water_source_name, active)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankMinimumVolume {
                water_tank_name,
                value,
            } => {
                self.manager
                    .set_water_tank_minimum_volume(&water_tank_name, value)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankMaxVolume {
                water_tank_name,
                value,
            } => {
                self.manager
                    .set_water_tank_max_volume(&water_tank_name, value)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankZeroVolume {
                water_tank_name,
                value,
            } => {
                self.manager
                    .set_water_tank_zero_volume(&water_tank_name, value)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankVolumeFactor {
                water_tank_name,
                value,
            } => {
                self.manager
                    .set_water_tank_volume_factor(&water_tank_name, value)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankPressureFactor {
                water_tank_name,
                value,
            } => {
                self.manager
                    .set_water_tank_pressure_factor(&water_tank_name, value)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankPressureChangingValue {
                water_tank_name,
                value,
            } => {
                self.manager
                    .set_water_tank_pressure_changing_value(&water_tank_name, value)?;
                Ok(ResponseBody::Ok)
            }
            R::SetWaterTankActive {
                water_tank_name,
                active,
            } => {
                self.manager
                    .set_water_tank_active(&water_tank_name, active)?;
                Ok(ResponseBody::Ok)
            }
            R::FillWaterTank {
                water_tank_name,
                enabled,
                force,
            } => {
                if enabled {
                    self.manager.fill_water_tank(&water_tank_name, force, now)?;
                } else {
                    self.manager.stop_filling_water_tank(&water_tank_name)?;
                }
                Ok(ResponseBody::Ok)
            }
            R::SetMode { mode } => {
                self.manager.set_mode(Mode::from_wire(mode)?);
                Ok(ResponseBody::Ok)
            }
            R::GetMode => Ok(ResponseBody::Mode(self.manager.mode().wire())),
            R::GetWaterSource { name } => {
                let turned_on = self.manager.source_is_on(&name)?;
                let source = self.manager.water_source(&name)?;
                Ok(ResponseBody::WaterSource(WaterSourceState::assemble(
                    source, turned_on,
                )))
            }
            R::GetWaterTank { name } => {
                let reading = self.manager.tank_reading(&name)?;
                let tank = self.manager.water_tank(&name)?;
                Ok(ResponseBody::WaterTank(WaterTankState::assemble(
                    tank, reading,
                )))
            }
            R::GetWaterSourceList => {
                Ok(ResponseBody::WaterSourceList(self.manager.water_source_list()))
            }
            R::GetWaterTankList => {
                Ok(ResponseBody::WaterTankList(self.manager.water_tank_list()))
            }
            R::Save => {
                self.persister.save(&self.manager)?;
                Ok(ResponseBody::Ok)
            }
            R::Reset => {
                self.manager.reset();
                Ok(ResponseBody::Ok)
            }
        }
    }

    // ── Emission ──────────────────────────────────────────────

    fn emit(port: &mut impl SerialTransport, response: &Response) {
        let mut payload = [0u8; MAX_FRAME_SIZE];
        let Ok(encoded) = postcard::to_slice(response, &mut payload) else {
            warn!("dispatcher: response does not fit a frame");
            return;
        };
        let mut frame = [0u8; MAX_FRAME_SIZE + 3];
        if let Some(wire_len) = encode_frame(API_MESSAGE, encoded, &mut frame) {
            port.write(&frame[..wire_len]);
        }
    }

    fn emit_error(port: &mut impl SerialTransport, id: u32, error: Error, arg: &str) {
        Self::emit(
            port,
            &Response {
                id,
                body: ResponseBody::Error(ErrorBody::new(error, arg)),
            },
        );
    }
}
