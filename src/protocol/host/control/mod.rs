//! USB control requests: `(request, param1, param2)` triples decoded into
//! [`HostCommand`]s and executed against the engine by [`HostPort`].
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::error::{ConfigError, HostError};
use crate::protocol::engine::{PacketEngine, QueueTarget};
use crate::protocol::health::{BUS_HEALTH_PACKET_VERSION, BUS_HEALTH_REPORT_LEN};
use crate::protocol::host::bulk::{BulkInEncoder, BulkOutDecoder, FeedSummary};
use crate::protocol::host::{CAN_PACKET_VERSION, HEALTH_PACKET_VERSION};
use crate::protocol::traits::board::{Board, ResetTarget};
use crate::protocol::traits::can_hardware::CanHardware;

/// Speeds travel in units of 100 bit/s.
const SPEED_UNIT: u32 = 100;
/// `param` value meaning "none" / "inbound queue".
const PARAM_NONE: u16 = 0xFFFF;

//==================================================================================REQUEST
/// Raw setup packet fields of a vendor control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlRequest {
    pub request: u8,
    pub param1: u16,
    pub param2: u16,
}

impl ControlRequest {
    pub const fn new(request: u8, param1: u16, param2: u16) -> Self {
        Self {
            request,
            param1,
            param2,
        }
    }
}

//==================================================================================COMMAND
/// Decoded control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCommand {
    /// `0xc0`: clear every queue and the bulk framing state.
    ResetCommunications,
    /// `0xc1`
    HardwareType,
    /// `0xc2`
    BusHealth { bus: u8 },
    /// `0xd1`, `0xd8`
    Reset(ResetTarget),
    /// `0xdd`
    Versions,
    /// `0xde`
    SetNominalSpeed { bus: u8, speed: u32 },
    /// `0xe5`
    SetLoopback(bool),
    /// `0xe6`
    SetSilent(bool),
    /// `0xe7`
    SetForwarding { src: u8, dst: Option<u8> },
    /// `0xf1`
    ClearQueue(QueueTarget),
    /// `0xf9`
    SetDataSpeed { bus: u8, speed: u32 },
    /// `0xfc`
    SetNonIso { bus: u8, enabled: bool },
}

impl HostCommand {
    pub fn parse(req: &ControlRequest) -> Result<Self, HostError> {
        let command = match req.request {
            0xc0 => Self::ResetCommunications,
            0xc1 => Self::HardwareType,
            0xc2 => Self::BusHealth {
                bus: bus_param(req.param1)?,
            },
            0xd1 => match req.param1 {
                0 => Self::Reset(ResetTarget::Bootloader),
                1 => Self::Reset(ResetTarget::Softloader),
                value => {
                    return Err(HostError::InvalidParameter {
                        request: req.request,
                        value,
                    })
                }
            },
            0xd8 => Self::Reset(ResetTarget::Application),
            0xdd => Self::Versions,
            0xde => Self::SetNominalSpeed {
                bus: bus_param(req.param1)?,
                speed: req.param2 as u32 * SPEED_UNIT,
            },
            0xe5 => Self::SetLoopback(req.param1 != 0),
            0xe6 => Self::SetSilent(req.param1 != 0),
            0xe7 => Self::SetForwarding {
                src: bus_param(req.param1)?,
                dst: match req.param2 {
                    PARAM_NONE => None,
                    dst => Some(bus_param(dst)?),
                },
            },
            0xf1 => Self::ClearQueue(match req.param1 {
                PARAM_NONE => QueueTarget::Inbound,
                bus => QueueTarget::Outbound(bus_param(bus)?),
            }),
            0xf9 => Self::SetDataSpeed {
                bus: bus_param(req.param1)?,
                speed: req.param2 as u32 * SPEED_UNIT,
            },
            0xfc => Self::SetNonIso {
                bus: bus_param(req.param1)?,
                enabled: req.param2 != 0,
            },
            request => return Err(HostError::UnknownRequest { request }),
        };
        Ok(command)
    }
}

fn bus_param(value: u16) -> Result<u8, HostError> {
    u8::try_from(value).map_err(|_| HostError::InvalidBus { bus: value })
}

//==================================================================================HOST_PORT
/// Host endpoint handlers bound to an engine and a board.
pub struct HostPort<'a, M: RawMutex, H, B, const N: usize, const Q: usize> {
    engine: &'a PacketEngine<M, H, N, Q>,
    board: B,
    bulk_in: BulkInEncoder,
    bulk_out: BulkOutDecoder,
}

impl<'a, M, H, B, const N: usize, const Q: usize> HostPort<'a, M, H, B, N, Q>
where
    M: RawMutex,
    H: CanHardware,
    B: Board,
{
    pub fn new(engine: &'a PacketEngine<M, H, N, Q>, board: B) -> Self {
        Self {
            engine,
            board,
            bulk_in: BulkInEncoder::new(),
            bulk_out: BulkOutDecoder::new(),
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    /// Handle one control request, writing the reply into `resp`. Returns the
    /// reply length.
    pub fn control(&mut self, req: &ControlRequest, resp: &mut [u8]) -> Result<usize, HostError> {
        let command = HostCommand::parse(req)?;
        #[cfg(feature = "defmt")]
        defmt::trace!("Control request: {}", command);
        self.execute(command, resp)
    }

    pub fn execute(&mut self, command: HostCommand, resp: &mut [u8]) -> Result<usize, HostError> {
        match command {
            HostCommand::ResetCommunications => {
                self.engine.reset_communications();
                self.bulk_in.reset();
                self.bulk_out.reset();
                Ok(0)
            }
            HostCommand::HardwareType => reply(resp, &[self.board.hw_type()]),
            HostCommand::BusHealth { bus } => {
                let report = self
                    .engine
                    .health_report(bus)
                    .ok_or(HostError::InvalidBus { bus: bus as u16 })?;
                reply::<BUS_HEALTH_REPORT_LEN>(resp, &report)
            }
            HostCommand::Reset(target) => {
                #[cfg(feature = "defmt")]
                defmt::info!("Reset requested: {}", target);
                self.board.request_reset(target);
                Ok(0)
            }
            HostCommand::Versions => reply(
                resp,
                &[HEALTH_PACKET_VERSION, CAN_PACKET_VERSION, BUS_HEALTH_PACKET_VERSION],
            ),
            HostCommand::SetNominalSpeed { bus, speed } => {
                self.engine
                    .update_bus_config(bus, |config| config.with_nominal_speed(speed))?;
                Ok(0)
            }
            HostCommand::SetLoopback(enabled) => {
                self.engine.set_loopback(enabled)?;
                Ok(0)
            }
            HostCommand::SetSilent(enabled) => {
                self.engine.set_silent(enabled)?;
                Ok(0)
            }
            HostCommand::SetForwarding { src, dst } => {
                self.engine.set_forwarding(src, dst)?;
                Ok(0)
            }
            HostCommand::ClearQueue(target) => {
                self.engine.reset_queue(target)?;
                Ok(0)
            }
            HostCommand::SetDataSpeed { bus, speed } => {
                self.require_fd(bus)?;
                self.engine
                    .update_bus_config(bus, |config| config.with_data_phase(speed))?;
                Ok(0)
            }
            HostCommand::SetNonIso { bus, enabled } => {
                self.require_fd(bus)?;
                self.engine
                    .update_bus_config(bus, |config| config.with_non_iso(enabled))?;
                Ok(0)
            }
        }
    }

    fn require_fd(&self, bus: u8) -> Result<(), ConfigError> {
        match self.engine.capabilities(bus) {
            None => Err(ConfigError::InvalidBus { bus }),
            Some(caps) if !caps.fd => Err(ConfigError::FdNotSupported),
            Some(_) => Ok(()),
        }
    }

    /// OUT transfer on the CAN endpoint: submit every frame, then give the
    /// buses a chance to start transmitting.
    pub fn bulk_out(&mut self, bytes: &[u8]) -> FeedSummary {
        let engine = self.engine;
        let summary = self
            .bulk_out
            .feed(bytes, |packet| engine.try_submit_for_transmit(packet));
        engine.service();
        summary
    }

    /// IN transfer on the CAN endpoint. Returns the number of bytes written.
    pub fn bulk_in(&mut self, buf: &mut [u8]) -> usize {
        let mut packets = self.engine.drain_inbound(buf.len());
        self.bulk_in.fill(buf, &mut packets)
    }
}

fn reply<const L: usize>(resp: &mut [u8], bytes: &[u8; L]) -> Result<usize, HostError> {
    let available = resp.len();
    let out = resp
        .get_mut(..L)
        .ok_or(HostError::ResponseTooSmall { needed: L, available })?;
    out.copy_from_slice(bytes);
    Ok(L)
}
