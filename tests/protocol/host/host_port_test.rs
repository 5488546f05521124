//! Host endpoints: bulk transfers and control requests against a live engine.
mod helpers {
    include!("../../helpers/mod.rs");
}

use canbridge::error::{ConfigError, HostError};
use canbridge::protocol::engine::PacketEngine;
use canbridge::protocol::host::control::{ControlRequest, HostPort};
use canbridge::protocol::packet::{Packet, MAX_FRAME_LEN};
use canbridge::protocol::traits::board::ResetTarget;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use helpers::{std_id, std_packet, FakeBoard, FakeCan};

type Engine = PacketEngine<NoopRawMutex, FakeCan, 3, 16>;

fn engine() -> Engine {
    let engine = Engine::new([FakeCan::classic(), FakeCan::fd(), FakeCan::fd()]);
    engine.init().expect("default config applies");
    engine
}

fn board() -> FakeBoard {
    FakeBoard {
        hw_type: 7,
        ..FakeBoard::default()
    }
}

fn control(
    port: &mut HostPort<'_, NoopRawMutex, FakeCan, FakeBoard, 3, 16>,
    request: u8,
    param1: u16,
    param2: u16,
) -> Result<usize, HostError> {
    let mut resp = [0u8; 64];
    port.control(&ControlRequest::new(request, param1, param2), &mut resp)
}

//==================================================================================BULK
#[test]
/// Frames written by the host are validated, queued and transmitted.
fn bulk_out_submits_and_transmits() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    let packets = [std_packet(0x10, 0, &[1, 2]), std_packet(0x11, 2, &[3])];
    let mut bytes = [0u8; 2 * MAX_FRAME_LEN];
    let mut len = 0;
    for packet in &packets {
        len += packet.encode(&mut bytes[len..]).unwrap();
    }
    // last byte of the second frame arrives in a later transfer
    let first = port.bulk_out(&bytes[..len - 1]);
    assert_eq!(first.accepted, 1);
    let second = port.bulk_out(&bytes[len - 1..len]);
    assert_eq!(second.accepted, 1);

    let sent0 = engine.with_hardware(0, |hw| hw.sent_packets()).unwrap();
    let sent2 = engine.with_hardware(2, |hw| hw.sent_packets()).unwrap();
    assert_eq!(sent0, vec![packets[0]]);
    assert_eq!(sent2, vec![packets[1]]);
}

#[test]
/// Corrupted host frames never reach a queue; the transfer summary reports them.
fn bulk_out_drops_corrupted() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    let mut bytes = [0u8; MAX_FRAME_LEN];
    let len = std_packet(0x20, 1, &[5; 8]).encode(&mut bytes).unwrap();
    bytes[len - 1] ^= 0xFF;

    let summary = port.bulk_out(&bytes[..len]);
    assert_eq!(summary.checksum_errors, 1);
    assert_eq!(engine.outbound_len(1), Some(0));
    assert!(engine.with_hardware(1, |hw| hw.sent.is_empty()).unwrap());
}

#[test]
/// Received frames stream to the host across small IN transfers.
fn bulk_in_streams_received_frames() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    let packets = [std_packet(0x30, 1, &[0xAB; 8]), std_packet(0x31, 1, &[])];
    engine.with_hardware(1, |hw| packets.iter().for_each(|p| hw.inject(p)));
    engine.on_receive(1);

    let mut stream = Vec::new();
    loop {
        let mut transfer = [0u8; 8];
        let written = port.bulk_in(&mut transfer);
        if written == 0 {
            break;
        }
        stream.extend_from_slice(&transfer[..written]);
    }

    let (first, used) = Packet::decode(&stream).unwrap();
    let (second, rest) = Packet::decode(&stream[used..]).unwrap();
    assert_eq!(used + rest, stream.len());
    assert_eq!(std_id(&first), 0x30);
    assert_eq!(std_id(&second), 0x31);
    assert_eq!(first, packets[0]);
}

//==================================================================================CONTROL
#[test]
/// Identity requests: hardware type and packet versions.
fn control_identity() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    let mut resp = [0u8; 8];
    assert_eq!(port.control(&ControlRequest::new(0xc1, 0, 0), &mut resp), Ok(1));
    assert_eq!(resp[0], 7);
    assert_eq!(port.control(&ControlRequest::new(0xdd, 0, 0), &mut resp), Ok(3));
    assert_eq!(&resp[..3], &[1, 4, 4]);
}

#[test]
/// Health request returns the 48-byte report of the requested bus.
fn control_bus_health() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    let mut resp = [0u8; 64];
    assert_eq!(port.control(&ControlRequest::new(0xc2, 2, 0), &mut resp), Ok(48));
    assert_eq!(&resp[41..43], &500u16.to_le_bytes());
    assert_eq!(&resp[43..45], &2000u16.to_le_bytes());

    assert_eq!(control(&mut port, 0xc2, 3, 0), Err(HostError::InvalidBus { bus: 3 }));
    let mut small = [0u8; 16];
    assert!(matches!(
        port.control(&ControlRequest::new(0xc2, 0, 0), &mut small),
        Err(HostError::ResponseTooSmall { needed: 48, .. })
    ));
}

#[test]
/// Speed requests reconfigure the bus; FD requests need an FD controller.
fn control_speeds() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    assert_eq!(control(&mut port, 0xde, 1, 2500), Ok(0));
    assert_eq!(engine.bus_config(1).unwrap().nominal_speed, 250_000);

    assert_eq!(control(&mut port, 0xf9, 1, 20000), Ok(0));
    let config = engine.bus_config(1).unwrap();
    assert!(config.fd_enabled && config.brs_enabled);

    assert_eq!(control(&mut port, 0xfc, 1, 1), Ok(0));
    assert!(engine.bus_config(1).unwrap().fd_non_iso);

    // 100 bit/s is not a data phase speed; FD and BRS stay as they were
    assert_eq!(
        control(&mut port, 0xf9, 1, 1),
        Err(HostError::Config(ConfigError::UnsupportedDataSpeed { speed: 100 }))
    );
    assert_eq!(engine.bus_config(1), Some(config.with_non_iso(true)));

    assert_eq!(
        control(&mut port, 0xf9, 0, 20000),
        Err(HostError::Config(ConfigError::FdNotSupported))
    );
    assert_eq!(
        control(&mut port, 0xde, 0, 1234),
        Err(HostError::Config(ConfigError::UnsupportedNominalSpeed { speed: 123_400 }))
    );
}

#[test]
/// Forwarding and queue clearing through control requests.
fn control_forwarding_and_queues() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    assert_eq!(control(&mut port, 0xe7, 0, 1), Ok(0));
    assert_eq!(engine.forwarding().get(0), Some(1));
    assert_eq!(control(&mut port, 0xe7, 0, 0xFFFF), Ok(0));
    assert_eq!(engine.forwarding().get(0), None);

    engine.with_hardware(0, |hw| hw.inject(&std_packet(0x1, 0, &[])));
    engine.on_receive(0);
    assert_eq!(engine.inbound_len(), 1);
    assert_eq!(control(&mut port, 0xf1, 0xFFFF, 0), Ok(0));
    assert_eq!(engine.inbound_len(), 0);

    assert_eq!(
        control(&mut port, 0xf1, 9, 0),
        Err(HostError::Config(ConfigError::InvalidBus { bus: 9 }))
    );
    assert_eq!(control(&mut port, 0xc0, 0, 0), Ok(0));
}

#[test]
/// Reset requests are passed to the board.
fn control_resets() {
    let engine = engine();
    let mut port = HostPort::new(&engine, board());

    assert_eq!(control(&mut port, 0xd1, 1, 0), Ok(0));
    assert_eq!(control(&mut port, 0xd8, 0, 0), Ok(0));
    assert_eq!(
        port.board().resets,
        vec![ResetTarget::Softloader, ResetTarget::Application]
    );
    assert_eq!(
        control(&mut port, 0x42, 0, 0),
        Err(HostError::UnknownRequest { request: 0x42 })
    );
}
