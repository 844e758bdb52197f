//! Integration tests: independent channels used from several threads

use std::collections::HashSet;
use std::thread;

use vmw_rpci::{send_one, Channel, ChannelConfig, SimulatedHost, PROTOCOL_RPCI};

#[test]
fn test_channels_on_threads_stay_independent() {
    let host = SimulatedHost::new();

    let handles: Vec<_> = (0..8u8)
        .map(|n| {
            let host = host.clone();
            thread::spawn(move || {
                let config = ChannelConfig {
                    protocol: PROTOCOL_RPCI,
                    prefer_low_bandwidth: n % 2 == 0,
                };
                let mut channel = Channel::open_with_config(host, &config).unwrap();
                let mut replies = Vec::new();
                for round in 0..10u8 {
                    let message = vec![n; usize::from(round) * 3 + 1];
                    channel.send(&message).unwrap();
                    replies.push((message, channel.receive().unwrap()));
                }
                let id = channel.id();
                channel.close().unwrap();
                (id, replies)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let (id, replies) = handle.join().expect("Thread panicked");
        assert!(ids.insert(id), "Duplicate channel id: {}", id);
        for (sent, received) in replies {
            assert_eq!(received, Some(sent));
        }
    }

    assert_eq!(ids.len(), 8);
    assert_eq!(host.open_sessions(), 0);
}

#[test]
fn test_one_shot_commands_on_threads() {
    let host = SimulatedHost::new();
    host.set_responder(|id, message| {
        let mut reply = format!("1 {}:", id).into_bytes();
        reply.extend_from_slice(message);
        Some(reply)
    });

    let handles: Vec<_> = (0..6)
        .map(|n| {
            let host = host.clone();
            thread::spawn(move || {
                let command = format!("command-{}", n);
                let reply = send_one(host, &ChannelConfig::default(), command.as_bytes()).unwrap();
                (command, reply)
            })
        })
        .collect();

    for handle in handles {
        let (command, reply) = handle.join().expect("Thread panicked");
        assert!(reply.ok);
        assert!(reply.body_str().ends_with(&command));
    }
    assert_eq!(host.open_sessions(), 0);
}
