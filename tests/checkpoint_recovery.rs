//! Integration tests: checkpoints, host faults and protocol violations
//!
//! Checkpoint handling differs by phase:
//! - bulk send and narrow receive restart from the size phase
//! - narrow send and bulk receive fail outright

mod fixtures;

use fixtures::{config, open, payload, LogCapture};
use rpci_protocol::{MessageStatus, MessageType};
use vmw_rpci::mock::{FailureConfig, Fault, Transaction};
use vmw_rpci::{Channel, ChannelError, ReceiveFailure, SimulatedHost};

const SEND_SIZE: Transaction = Transaction::Narrow(MessageType::SendSize);
const SEND_PAYLOAD: Transaction = Transaction::Narrow(MessageType::SendPayload);
const RECEIVE_SIZE: Transaction = Transaction::Narrow(MessageType::ReceiveSize);
const RECEIVE_PAYLOAD: Transaction = Transaction::Narrow(MessageType::ReceivePayload);

fn receive_failure(err: ChannelError) -> ReceiveFailure {
    match err {
        ChannelError::ReceiveFailed { reason, .. } => reason,
        other => panic!("expected a receive failure, got {:?}", other),
    }
}

// === Restarted phases ===

#[test]
fn test_bulk_send_retries_after_checkpoints() {
    for checkpoints in [1u32, 3, 5] {
        let (host, mut channel) = open(false);
        host.inject_failure(
            Transaction::BulkOut,
            FailureConfig::checkpoint().with_fail_count(checkpoints),
        );
        let message = payload(37);

        channel.send(&message).unwrap();

        let attempts = checkpoints as usize + 1;
        assert_eq!(host.count(SEND_SIZE), attempts);
        assert_eq!(host.count(Transaction::BulkOut), attempts);
        // Delivered exactly once
        assert_eq!(host.received(channel.id()), vec![message]);
    }
}

#[test]
fn test_narrow_receive_retries_after_checkpoints() {
    for checkpoints in [1u32, 2, 4] {
        let (host, mut channel) = open(true);
        host.set_responder(|_, _| None);
        let message = payload(11);
        assert!(host.queue_message(channel.id(), message.clone()));
        host.inject_failure(
            RECEIVE_PAYLOAD,
            FailureConfig::checkpoint().with_fail_count(checkpoints),
        );

        assert_eq!(channel.receive().unwrap(), Some(message));

        assert_eq!(host.count(RECEIVE_SIZE), checkpoints as usize + 1);
        assert_eq!(
            host.acknowledgments(),
            vec![(MessageType::ReceiveStatus, MessageStatus::SUCCESS)]
        );
        assert_eq!(host.pending(channel.id()), 0);
    }
}

#[test]
fn test_narrow_receive_checkpoint_mid_message() {
    let (host, mut channel) = open(true);
    host.set_responder(|_, _| None);
    let message = payload(17);
    assert!(host.queue_message(channel.id(), message.clone()));

    // Two words arrive, the third is interrupted
    host.inject_failure(
        RECEIVE_PAYLOAD,
        FailureConfig::checkpoint().after(2).with_fail_count(1),
    );

    assert_eq!(channel.receive().unwrap(), Some(message));

    assert_eq!(host.count(RECEIVE_SIZE), 2);
    // 3 words before the checkpoint, then all 5 again
    assert_eq!(host.count(RECEIVE_PAYLOAD), 8);
    assert_eq!(host.pending(channel.id()), 0);
}

// === Phases that do not restart ===

#[test]
fn test_narrow_send_checkpoint_is_a_failure() {
    let (host, mut channel) = open(true);
    host.inject_failure(SEND_PAYLOAD, FailureConfig::checkpoint().with_fail_count(1));

    let err = channel.send(&payload(9)).unwrap_err();

    assert!(matches!(err, ChannelError::SendFailed { .. }));
    assert_eq!(host.count(SEND_SIZE), 1);
    assert_eq!(host.count(SEND_PAYLOAD), 1);
    assert!(host.received(channel.id()).is_empty());
}

#[test]
fn test_bulk_receive_checkpoint_is_a_failure() {
    let (host, mut channel) = open(false);
    host.set_responder(|_, _| None);
    let message = payload(8);
    assert!(host.queue_message(channel.id(), message.clone()));
    host.inject_failure(
        Transaction::BulkIn,
        FailureConfig::checkpoint().with_fail_count(1),
    );

    let err = channel.receive().unwrap_err();

    assert_eq!(receive_failure(err), ReceiveFailure::Transfer);
    assert_eq!(host.count(RECEIVE_SIZE), 1);
    assert_eq!(
        host.acknowledgments(),
        vec![(MessageType::ReceivePayload, MessageStatus::FAIL)]
    );

    // The host kept the message; asking again gets it
    assert_eq!(host.pending(channel.id()), 1);
    assert_eq!(channel.receive().unwrap(), Some(message));
}

// === Host faults ===

#[test]
fn test_bulk_send_failure() {
    let (host, mut channel) = open(false);
    host.inject_failure(Transaction::BulkOut, FailureConfig::fail());

    let err = channel.send(&payload(20)).unwrap_err();

    assert!(matches!(err, ChannelError::SendFailed { .. }));
    assert_eq!(host.count(SEND_SIZE), 1);
}

#[test]
fn test_refused_poll() {
    let (host, mut channel) = open(false);
    host.inject_failure(RECEIVE_SIZE, FailureConfig::fail());

    let err = channel.receive().unwrap_err();

    assert_eq!(receive_failure(err), ReceiveFailure::Poll);
    assert_eq!(host.total_transactions(), 1);
}

#[test]
fn test_narrow_receive_failure_is_signalled() {
    let (host, mut channel) = open(true);
    host.set_responder(|_, _| None);
    assert!(host.queue_message(channel.id(), payload(6)));
    host.inject_failure(RECEIVE_PAYLOAD, FailureConfig::fail().with_fail_count(1));

    let err = channel.receive().unwrap_err();

    assert_eq!(receive_failure(err), ReceiveFailure::Transfer);
    assert_eq!(
        host.acknowledgments(),
        vec![(MessageType::ReceivePayload, MessageStatus::FAIL)]
    );
}

// === Protocol violations ===

#[test]
fn test_wrong_type_on_size_query() {
    let (host, mut channel) = open(false);
    host.set_responder(|_, _| None);
    assert!(host.queue_message(channel.id(), payload(5)));
    host.inject_failure(
        RECEIVE_SIZE,
        FailureConfig::new(Fault::Echo(MessageType::ReceiveStatus)).with_fail_count(1),
    );

    let err = channel.receive().unwrap_err();

    assert_eq!(
        receive_failure(err),
        ReceiveFailure::ProtocolViolation {
            expected: MessageType::SendSize,
            found: MessageType::ReceiveStatus.as_u16(),
        }
    );
    assert_eq!(
        host.acknowledgments(),
        vec![(MessageType::ReceivePayload, MessageStatus::FAIL)]
    );
    assert_eq!(host.count(Transaction::BulkIn), 0);
}

#[test]
fn test_wrong_type_on_narrow_payload() {
    let (host, mut channel) = open(true);
    host.set_responder(|_, _| None);
    assert!(host.queue_message(channel.id(), payload(12)));
    host.inject_failure(
        RECEIVE_PAYLOAD,
        FailureConfig::new(Fault::Echo(MessageType::ReceiveSize)).with_fail_count(1),
    );

    let err = channel.receive().unwrap_err();

    assert_eq!(
        receive_failure(err),
        ReceiveFailure::ProtocolViolation {
            expected: MessageType::SendPayload,
            found: MessageType::ReceiveSize.as_u16(),
        }
    );
    assert_eq!(
        host.acknowledgments(),
        vec![(MessageType::ReceivePayload, MessageStatus::FAIL)]
    );
    // No further payload requests after the violation
    assert_eq!(host.count(RECEIVE_PAYLOAD), 2);
}

// === Logging ===

#[test]
fn test_checkpoint_retry_is_logged() {
    let capture = LogCapture::new();
    let host = SimulatedHost::new();
    let mut channel =
        Channel::open_with_dispatch(host.clone(), &config(false), capture.dispatch()).unwrap();
    host.inject_failure(
        Transaction::BulkOut,
        FailureConfig::checkpoint().with_fail_count(1),
    );

    channel.send(b"hello").unwrap();

    let logs = capture.contents();
    assert!(logs.contains("opened channel"), "logs: {}", logs);
    assert!(
        logs.contains("a checkpoint occurred, retrying the send"),
        "logs: {}",
        logs
    );
}

#[test]
fn test_failures_are_logged_to_injected_dispatch() {
    let capture = LogCapture::new();
    let host = SimulatedHost::new();
    let mut channel =
        Channel::open_with_dispatch(host.clone(), &config(false), capture.dispatch()).unwrap();
    host.inject_failure(SEND_SIZE, FailureConfig::fail());

    assert!(channel.send(b"hello").is_err());

    let logs = capture.contents();
    assert!(logs.contains("ERROR"), "logs: {}", logs);
    assert!(
        logs.contains("unable to send a message over the communication channel"),
        "logs: {}",
        logs
    );
}

#[test]
fn test_failed_acknowledgment_keeps_received_message() {
    let capture = LogCapture::new();
    let host = SimulatedHost::new();
    let mut channel =
        Channel::open_with_dispatch(host.clone(), &config(false), capture.dispatch()).unwrap();
    channel.send(b"ping").unwrap();
    host.inject_failure(
        Transaction::Narrow(MessageType::ReceiveStatus),
        FailureConfig::fail(),
    );

    assert_eq!(channel.receive().unwrap(), Some(b"ping".to_vec()));

    let logs = capture.contents();
    assert!(
        logs.contains("unable to acknowledge a message over the communication channel"),
        "logs: {}",
        logs
    );
}

#[test]
fn test_failed_error_signal_keeps_receive_failure() {
    let capture = LogCapture::new();
    let host = SimulatedHost::new();
    let mut channel =
        Channel::open_with_dispatch(host.clone(), &config(false), capture.dispatch()).unwrap();
    channel.send(&payload(8)).unwrap();
    host.inject_failure(Transaction::BulkIn, FailureConfig::fail());
    host.inject_failure(RECEIVE_PAYLOAD, FailureConfig::fail());

    let err = channel.receive().unwrap_err();

    assert_eq!(receive_failure(err), ReceiveFailure::Transfer);
    assert_eq!(host.count(RECEIVE_PAYLOAD), 1);
    let logs = capture.contents();
    assert!(
        logs.contains("unable to signal a reception error over the communication channel"),
        "logs: {}",
        logs
    );
}
