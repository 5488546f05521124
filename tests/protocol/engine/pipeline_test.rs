//! Receive and transmit pipeline: integrity checks, confirmations, losses.
mod helpers {
    include!("../../helpers/mod.rs");
}

use canbridge::error::SubmitError;
use canbridge::infra::checksum;
use canbridge::protocol::controller::TransmitOutcome;
use canbridge::protocol::engine::PacketEngine;
use canbridge::protocol::packet::RawFrame;
use canbridge::protocol::traits::can_hardware::TxCompletion;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use helpers::{std_id, std_packet, FakeCan};

type Engine = PacketEngine<NoopRawMutex, FakeCan, 2, 8>;

fn engine() -> Engine {
    let engine = Engine::new([FakeCan::classic(), FakeCan::fd()]);
    engine.init().expect("default config applies");
    engine
}

//==================================================================================RECEIVE
#[test]
/// A frame with a flipped payload bit is never queued anywhere, and counted.
fn corrupted_frame_is_dropped() {
    let engine = engine();
    engine.set_forwarding(0, Some(1)).unwrap();

    let packet = std_packet(0x321, 0, &[0xAA, 0xBB]);
    let mut frame = RawFrame::from_packet(&packet);
    frame.as_bytes_mut()[7] ^= 0x10;
    engine.with_hardware(0, |hw| hw.rx.push_back(frame));

    let summary = engine.on_receive(0);
    assert_eq!(summary.drained, 1);
    assert_eq!(summary.dropped, 1);
    assert_eq!(engine.inbound_len(), 0);
    assert_eq!(engine.outbound_len(1), Some(0));

    let health = engine.snapshot_health(0).unwrap();
    assert_eq!(health.total_rx_checksum_error_cnt, 1);
    assert_eq!(health.total_rx_cnt, 0);
}

#[test]
/// A frame tagged with another bus is treated as corrupted.
fn foreign_bus_tag_is_dropped() {
    let engine = engine();
    engine.with_hardware(0, |hw| hw.inject(&std_packet(0x1, 1, &[])));

    assert_eq!(engine.on_receive(0).dropped, 1);
    assert_eq!(engine.inbound_len(), 0);
}

#[test]
/// The FIFO is drained in one interrupt; each valid frame flashes activity.
fn receive_drains_fifo() {
    let engine = engine();
    engine.with_hardware(0, |hw| {
        for id in 0..5 {
            hw.inject(&std_packet(id, 0, &[id as u8]));
        }
    });

    let summary = engine.on_receive(0);
    assert_eq!(summary.drained, 5);
    assert_eq!(engine.inbound_len(), 5);
    assert_eq!(engine.with_hardware(0, |hw| hw.activity), Some(5));

    let ids: Vec<u16> = engine.drain_inbound(8).map(|p| std_id(&p)).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[test]
/// A FIFO overrun is counted as a lost receive.
fn overrun_counts_rx_lost() {
    let engine = engine();
    engine.with_hardware(0, |hw| hw.overrun = true);
    engine.on_receive(0);
    engine.on_receive(0);
    assert_eq!(engine.snapshot_health(0).unwrap().total_rx_lost_cnt, 1);
}

#[test]
/// Once the inbound queue is full further frames are counted as overflow.
fn inbound_overflow_is_counted() {
    let engine = engine();
    engine.with_hardware(0, |hw| {
        for id in 0..10 {
            hw.inject(&std_packet(id, 0, &[]));
        }
    });
    engine.on_receive(0);

    assert_eq!(engine.inbound_len(), 8);
    assert_eq!(engine.overflow_counters().rx_buffer_overflow, 2);
}

//==================================================================================TRANSMIT
#[test]
/// A delivered frame comes back to the host flagged `returned`.
fn delivered_frame_is_confirmed() {
    let engine = engine();
    let packet = std_packet(0x55, 0, &[1, 2, 3]);
    assert!(engine.submit_for_transmit(packet));

    assert_eq!(engine.on_transmit(0), TransmitOutcome::Sent);
    assert_eq!(engine.inbound_len(), 0);
    // completion interrupt
    assert_eq!(engine.on_transmit(0), TransmitOutcome::Idle);

    let echo = engine.drain_inbound(1).next().unwrap();
    assert!(echo.returned);
    assert!(!echo.rejected);
    assert_eq!(echo.data(), packet.data());
    assert!(checksum::verify(&echo));
    assert_eq!(engine.snapshot_health(0).unwrap().total_tx_cnt, 1);
}

#[test]
/// A busy mailbox keeps the packet queued until the previous frame completes.
fn busy_mailbox_holds_queue() {
    let engine = engine();
    engine.with_hardware(0, |hw| hw.auto_complete = None);
    assert!(engine.submit_for_transmit(std_packet(0x1, 0, &[])));
    assert!(engine.submit_for_transmit(std_packet(0x2, 0, &[])));

    assert_eq!(engine.on_transmit(0), TransmitOutcome::Sent);
    assert_eq!(engine.on_transmit(0), TransmitOutcome::Busy);
    assert_eq!(engine.outbound_len(0), Some(1));

    engine.with_hardware(0, |hw| hw.complete(TxCompletion::Failed));
    assert_eq!(engine.on_transmit(0), TransmitOutcome::Sent);

    let health = engine.snapshot_health(0).unwrap();
    assert_eq!(health.total_tx_lost_cnt, 1);
    assert_eq!(health.total_tx_cnt, 2);
    assert_eq!(engine.inbound_len(), 0);
}

#[test]
/// A controller refusing the frame counts a lost transmission.
fn refused_send_counts_lost() {
    let engine = engine();
    engine.with_hardware(0, |hw| hw.reject_send = true);
    assert!(engine.submit_for_transmit(std_packet(0x7, 0, &[])));

    assert_eq!(engine.on_transmit(0), TransmitOutcome::Lost);
    assert_eq!(engine.snapshot_health(0).unwrap().total_tx_lost_cnt, 1);
}

#[test]
/// A packet whose payload changed after sealing is refused, counted, and
/// never reaches the mailbox.
fn corrupted_submit_is_refused() {
    let engine = engine();
    let mut packet = std_packet(0x8, 0, &[1]);
    packet.data_mut()[0] = 2;
    assert_eq!(
        engine.try_submit_for_transmit(packet),
        Err(SubmitError::Checksum)
    );
    assert_eq!(engine.on_transmit(0), TransmitOutcome::Idle);
    assert!(engine.with_hardware(0, |hw| hw.sent.is_empty()).unwrap());
    assert_eq!(
        engine.snapshot_health(0).unwrap().total_tx_checksum_error_cnt,
        1
    );
}

//==================================================================================SUBMIT
#[test]
/// Submission checks the bus index, the FD setting and queue capacity.
fn submit_validation() {
    let engine = engine();

    assert_eq!(
        engine.try_submit_for_transmit(std_packet(0x1, 2, &[])),
        Err(SubmitError::InvalidBus { bus: 2 })
    );
    assert_eq!(
        engine.try_submit_for_transmit(std_packet(0x1, 1, &[0; 12])),
        Err(SubmitError::FdDisabled)
    );

    engine
        .update_bus_config(1, |config| config.with_data_phase(2_000_000))
        .unwrap();
    assert_eq!(engine.try_submit_for_transmit(std_packet(0x1, 1, &[0; 12])), Ok(()));

    for id in 0..7 {
        engine.try_submit_for_transmit(std_packet(id, 1, &[])).unwrap();
    }
    assert_eq!(
        engine.try_submit_for_transmit(std_packet(0x9, 1, &[])),
        Err(SubmitError::QueueFull)
    );
    assert_eq!(engine.overflow_counters().tx_buffer_overflow, 1);
}
