use std::sync::atomic::Ordering;
use std::time::Duration;

use lwnsim_device::{
    activation::JoinRequest,
    config::{AESKey, SimulatorConfig},
    crypto::Direction,
    device::{runtime::Simulator, status::Mode, Device},
    error::{FrameError, ProtocolError, SecurityError},
    lorawan::{
        commands::{decode_commands, CommandIdentifier, MacCommand},
        mac::MType,
    },
};

mod mock;
use mock::{
    build_downlink, init_logger, join_accept, join_server, joined_device, parse_uplink,
    session_of, test_config, Downlink, MockTransport, RecordingSink, APP_KEY, DEV_ADDR,
};

#[test]
fn test_activation_retries_until_valid_join_accept() {
    init_logger();
    let mut attempts = 0;
    let (transport, link) = MockTransport::with_responder(move |_frame: &[u8]| {
        attempts += 1;
        let key = if attempts <= 3 {
            AESKey::new([0xEE; 16])
        } else {
            APP_KEY
        };
        vec![join_accept(&key, DEV_ADDR, None)]
    });
    let sink = RecordingSink::default();
    let mut device = Device::new(test_config("join-retry"), transport, sink.clone());
    device.status_mut().fcnt_down = 7;

    for _ in 0..3 {
        device.join();
        assert!(!device.status().joined);
        assert_eq!(device.status().fcnt_down, 7);
        assert_eq!(device.status().mode, Mode::Activation);
        assert!(device.status().session.is_none());
    }
    assert_eq!(sink.errors().len(), 3);
    assert!(sink.errors()[0].contains("[ERROR]: invalid join-accept MIC"));

    device.join();
    assert!(device.status().joined);
    assert_eq!(device.status().fcnt_down, 0);
    assert_eq!(device.status().mode, Mode::Normal);
    assert_eq!(session_of(&device).dev_addr, DEV_ADDR);
    assert_eq!(link.sent().len(), 4);
}

#[test]
fn test_join_request_uses_fresh_dev_nonce() {
    let (transport, link) = MockTransport::new();
    let sink = RecordingSink::default();
    let mut device = Device::new(test_config("nonce"), transport, sink.clone());

    for _ in 0..8 {
        device.join();
    }
    assert!(!device.status().joined);
    assert!(sink.errors()[0].contains("join request not accepted"));

    let nonces: Vec<u16> = link
        .sent()
        .iter()
        .map(|frame| JoinRequest::parse(frame).unwrap().dev_nonce)
        .collect();
    assert_eq!(nonces.len(), 8);
    assert!(nonces.iter().any(|nonce| *nonce != nonces[0]));
}

#[test]
fn test_join_accept_cf_list() {
    let mut cf_list = [0u8; 16];
    // 867.1 MHz and 867.3 MHz
    cf_list[0..3].copy_from_slice(&(8_671_000u32).to_le_bytes()[..3]);
    cf_list[3..6].copy_from_slice(&(8_673_000u32).to_le_bytes()[..3]);

    let (transport, _link) = MockTransport::with_responder(move |_frame: &[u8]| {
        vec![join_accept(&APP_KEY, DEV_ADDR, Some(cf_list))]
    });
    let mut device = Device::new(test_config("cf-list"), transport, RecordingSink::default());
    device.otaa_activation().unwrap();

    let channels = &device.status().channels;
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[&3].frequency, 867_100_000);
    assert_eq!(channels[&4].frequency, 867_300_000);
}

#[test]
fn test_uplink_layout() {
    let (mut device, link, sink) = joined_device(test_config("uplink"));
    device.execute();
    device.execute();

    let sent = link.sent();
    assert_eq!(sent.len(), 2);
    let first = parse_uplink(&sent[0]);
    let second = parse_uplink(&sent[1]);
    assert_eq!(first.mtype, MType::UnconfirmedDataUp);
    assert_eq!(first.fhdr.dev_addr, DEV_ADDR);
    assert_eq!(first.fhdr.f_cnt, 0);
    assert_eq!(second.fhdr.f_cnt, 1);
    assert_eq!(first.f_port, Some(1));
    assert!(first.fhdr.f_ctrl.adr);
    assert_eq!(device.status().fcnt_up, 2);

    // Payload decrypts under AppSKey
    let session = session_of(&device);
    let plain = lwnsim_device::crypto::encrypt_frm_payload(
        &session.app_skey,
        DEV_ADDR,
        0,
        Direction::Up,
        &first.frm_payload,
    )
    .unwrap();
    assert_eq!(&plain[..], b"hello");

    assert!(sink
        .messages(false)
        .iter()
        .any(|line| line == "|Normal| {A}: Unconfirmed uplink sent"));
}

#[test]
fn test_confirmed_uplink_retransmission() {
    let mut config = test_config("retransmit");
    config.confirmed = true;
    config.nb_retransmission = 3;
    let (mut device, link, sink) = joined_device(config);

    device.execute();
    assert_eq!(device.status().mode, Mode::Retransmission);
    device.execute();
    assert_eq!(device.status().mode, Mode::Retransmission);
    device.execute();
    assert_eq!(device.status().mode, Mode::Normal);
    assert!(sink
        .errors()
        .iter()
        .any(|line| line.ends_with("last uplink not acknowledged")));

    let sent = link.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], sent[1]);
    assert_eq!(sent[1], sent[2]);
    assert_eq!(parse_uplink(&sent[0]).mtype, MType::ConfirmedDataUp);
    assert_eq!(device.status().fcnt_up, 1);

    device.execute();
    assert_eq!(parse_uplink(&link.last_sent().unwrap()).fhdr.f_cnt, 1);
}

#[test]
fn test_ack_ends_retransmission() {
    let mut config = test_config("acked");
    config.confirmed = true;
    config.nb_retransmission = 3;
    let (mut device, link, _sink) = joined_device(config);
    let session = session_of(&device);

    link.push_downlink(build_downlink(
        &session,
        &Downlink {
            ack: true,
            ..Default::default()
        },
    ));
    device.execute();
    assert_eq!(device.status().mode, Mode::Normal);
    assert_eq!(device.status().last_uplink, None);
}

#[test]
fn test_fpending_polls_with_empty_uplink() {
    let (mut device, link, _sink) = joined_device(test_config("fpending"));
    let session = session_of(&device);

    link.push_downlink(build_downlink(
        &session,
        &Downlink {
            fpending: true,
            ..Default::default()
        },
    ));
    device.execute();
    assert_eq!(device.status().mode, Mode::FPending);

    device.execute();
    let poll = parse_uplink(&link.last_sent().unwrap());
    assert_eq!(poll.mtype, MType::UnconfirmedDataUp);
    assert_eq!(poll.f_port, None);
    assert!(poll.frm_payload.is_empty());
    assert_eq!(device.status().mode, Mode::Normal);
}

#[test]
fn test_counter_mismatch_resynchronises() {
    let (mut device, _link, sink) = joined_device(test_config("resync"));
    let session = session_of(&device);

    let frame = build_downlink(
        &session,
        &Downlink {
            fcnt: 5,
            fport: Some(2),
            payload: vec![0x01],
            ..Default::default()
        },
    );
    let info = device.process_downlink(&frame).unwrap().unwrap();
    assert_eq!(info.data_payload, Some(vec![0x01]));
    assert_eq!(device.status().fcnt_down, 6);
    assert_eq!(sink.downlinks(), vec![(2, vec![0x01])]);
    assert!(sink
        .errors()
        .iter()
        .any(|line| line.contains("invalid downlink counter: expected 0, FHDR 5")));
}

#[test]
fn test_disabled_counter_check() {
    let mut config = test_config("no-fcnt");
    config.disable_fcnt_down = true;
    let (mut device, _link, sink) = joined_device(config);
    let session = session_of(&device);

    let frame = build_downlink(
        &session,
        &Downlink {
            fcnt: 5,
            ..Default::default()
        },
    );
    device.process_downlink(&frame).unwrap();
    assert!(sink.errors().is_empty());
    assert_eq!(device.status().fcnt_down, 1);
}

#[test]
fn test_join_accept_rejected_once_joined() {
    let (mut device, _link, _sink) = joined_device(test_config("replay"));
    let session = session_of(&device);
    for _ in 0..3 {
        device.execute();
    }

    let replayed = join_accept(&APP_KEY, DEV_ADDR, None);
    assert_eq!(
        device.process_downlink(&replayed),
        Err(FrameError::Protocol(ProtocolError::UnexpectedPayloadKind))
    );
    assert_eq!(session_of(&device), session);
    assert_eq!(device.status().fcnt_up, 3);
    assert_eq!(device.status().mode, Mode::Normal);
}

#[test]
fn test_failed_rejoin_keeps_session() {
    let (transport, link) = MockTransport::new();
    let sink = RecordingSink::default();
    let mut device = Device::new(test_config("rejoin"), transport, sink.clone());
    link.push_downlink(join_accept(&APP_KEY, DEV_ADDR, None));
    device.join();
    assert!(device.status().joined);
    let session = session_of(&device);

    // No answer this time
    device.join();
    assert!(device.status().joined);
    assert_eq!(device.status().mode, Mode::Normal);
    assert_eq!(session_of(&device), session);
    assert!(sink.errors()[0].starts_with("|Normal| {A} [ERROR]"));
}

#[test]
fn test_oversized_uplink_keeps_mac_answers() {
    let mut config = test_config("oversized");
    config.payload = vec![0xAA; 245];
    let (mut device, link, sink) = joined_device(config);
    device.status_mut().uplink_commands.push(MacCommand::DevStatusAns {
        battery: 255,
        margin: 0,
    });

    device.execute();

    assert!(link.sent().is_empty());
    assert!(sink
        .errors()
        .iter()
        .any(|line| line.ends_with("frame exceeds 256 bytes")));
    let status = device.status();
    assert!(status.uplink_commands.contains(CommandIdentifier::DevStatus));
    assert_eq!(status.fcnt_up, 0);
    assert_eq!(status.adr.ack_cnt, 0);
}

#[test]
fn test_tampered_downlink_leaves_status_untouched() {
    let (mut device, _link, _sink) = joined_device(test_config("tampered"));
    let session = session_of(&device);
    device
        .status_mut()
        .uplink_commands
        .push(MacCommand::RXTimingSetupAns);
    let before = device.snapshot();

    let mut frame = build_downlink(
        &session,
        &Downlink {
            fport: Some(1),
            payload: vec![1, 2, 3],
            ..Default::default()
        },
    );
    let last = frame.len() - 1;
    frame[last] ^= 0x55;

    assert_eq!(
        device.process_downlink(&frame),
        Err(FrameError::Security(SecurityError::InvalidMic))
    );
    assert_eq!(device.snapshot(), before);
}

#[test]
fn test_mac_commands_are_answered() {
    let (mut device, link, sink) = joined_device(test_config("mac"));
    let session = session_of(&device);

    // LinkADRReq DR5/TXPower2, DevStatusReq, DutyCycleReq, NewChannelReq ch 3
    let mut commands = vec![0x03, 0x52, 0xFF, 0x00, 0x01, 0x06, 0x04, 0x02, 0x07, 0x03];
    commands.extend_from_slice(&(8_671_000u32).to_le_bytes()[..3]);
    commands.push(0x50);
    link.push_downlink(build_downlink(
        &session,
        &Downlink {
            fport: Some(0),
            payload: commands,
            ..Default::default()
        },
    ));
    device.execute();

    assert_eq!(device.status().adr.data_rate, 5);
    assert_eq!(device.status().adr.tx_power, 2);
    assert_eq!(device.status().max_duty_cycle, 2);
    assert_eq!(device.status().channels[&3].frequency, 867_100_000);

    device.execute();
    let uplink = parse_uplink(&link.last_sent().unwrap());
    let answers = decode_commands(&uplink.fhdr.f_opts, Direction::Up).unwrap();
    assert_eq!(
        answers,
        vec![
            MacCommand::LinkADRAns {
                power_ack: true,
                data_rate_ack: true,
                channel_mask_ack: true,
            },
            MacCommand::DevStatusAns {
                battery: 255,
                margin: 0,
            },
            MacCommand::DutyCycleAns,
            MacCommand::NewChannelAns {
                channel_freq_ok: true,
                data_rate_ok: true,
            },
        ]
    );

    // The following downlink reports the completed ADR change
    link.push_downlink(build_downlink(
        &session,
        &Downlink {
            fcnt: 1,
            ..Default::default()
        },
    ));
    device.execute();
    assert!(sink
        .messages(false)
        .iter()
        .any(|line| line.contains("ADR: data rate DR5")));
}

#[test]
fn test_dl_channel_request() {
    let (mut device, _link, _sink) = joined_device(test_config("dl-channel"));

    device.handle_mac_commands(&[
        MacCommand::DlChannelReq {
            ch_index: 4,
            freq: 868_100_000,
        },
        MacCommand::NewChannelReq {
            ch_index: 4,
            freq: 867_500_000,
            max_dr: 5,
            min_dr: 0,
        },
        MacCommand::DlChannelReq {
            ch_index: 4,
            freq: 868_100_000,
        },
    ]);

    let channel = device.status().channels[&4];
    assert_eq!(channel.downlink_frequency, Some(868_100_000));
}

#[tokio::test(start_paused = true)]
async fn test_runtime_joins_and_sends() {
    init_logger();
    let (transport, link) = MockTransport::with_responder(join_server(APP_KEY));
    let mut simulator = Simulator::new();
    simulator.spawn(Device::new(
        test_config("runtime"),
        transport,
        RecordingSink::default(),
    ));
    assert_eq!(simulator.running(), 1);

    tokio::time::sleep(Duration::from_millis(3_500)).await;

    let snapshot = simulator.devices()[0].snapshot();
    assert!(snapshot.status.joined);
    assert_eq!(snapshot.status.fcnt_up, 3);
    assert_eq!(link.sent().len(), 4);

    let devices = simulator.shutdown().await;
    assert_eq!(devices.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_before_next_tick() {
    let (transport, link) = MockTransport::with_responder(join_server(APP_KEY));
    let sink = RecordingSink::default();
    let mut simulator = Simulator::new();
    simulator.spawn(Device::new(test_config("cancel"), transport, sink.clone()));
    let running = simulator.running_counter();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(link.sent().len(), 2);

    let start = tokio::time::Instant::now();
    let devices = simulator.shutdown().await;
    assert!(start.elapsed() < Duration::from_millis(1_000));

    assert_eq!(running.load(Ordering::SeqCst), 0);
    assert_eq!(link.sent().len(), 2);
    assert_eq!(devices[0].status().fcnt_up, 1);
    assert!(sink
        .messages(false)
        .last()
        .is_some_and(|line| line.ends_with("Turn OFF")));
}

#[tokio::test(start_paused = true)]
async fn test_turn_off_single_device() {
    let mut simulator = Simulator::new();
    for name in ["first", "second"] {
        let (transport, _link) = MockTransport::with_responder(join_server(APP_KEY));
        let mut config = test_config(name);
        config.id = if name == "first" { 1 } else { 2 };
        simulator.spawn(Device::new(config, transport, RecordingSink::default()));
    }
    assert_eq!(simulator.running(), 2);

    simulator.device(1).unwrap().turn_off();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(simulator.running(), 1);
    assert!(simulator.device(1).unwrap().is_finished());
    assert!(!simulator.device(2).unwrap().is_finished());

    simulator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_skips_exchanges() {
    let (transport, link) = MockTransport::with_responder(join_server(APP_KEY));
    let mut simulator = Simulator::new();
    let handle = simulator.spawn(Device::new(
        test_config("paused"),
        transport,
        RecordingSink::default(),
    ));
    handle.pause();
    assert!(handle.is_paused());

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    // Only the join exchange
    assert_eq!(link.sent().len(), 1);

    simulator.devices()[0].resume();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(link.sent().len(), 3);
    assert_eq!(simulator.devices()[0].snapshot().status.fcnt_up, 2);

    simulator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_simulator_from_config() {
    let config = SimulatorConfig::from_toml_str(
        r#"
        [[device]]
        name = "alpha"
        dev_eui = "0004A30B001C0530"
        join_eui = "70B3D57ED0000000"
        app_key = "2B7E151628AED2A6ABF7158809CF4F3C"
        send_interval_ms = 1000

        [[device]]
        name = "beta"
        dev_eui = "0004A30B001C0531"
        join_eui = "70B3D57ED0000000"
        app_key = "2B7E151628AED2A6ABF7158809CF4F3C"
        send_interval_ms = 1000
        supported_class_c = true
        "#,
    )
    .unwrap();

    let simulator = Simulator::from_config(
        &config,
        |_device| MockTransport::with_responder(join_server(APP_KEY)).0,
        RecordingSink::default(),
    );
    assert_eq!(simulator.running(), 2);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let beta = simulator.device(2).unwrap().snapshot();
    assert_eq!(beta.name, "beta");
    assert!(beta.status.joined);
    assert_eq!(beta.class.to_string(), "C");

    let devices = simulator.shutdown().await;
    assert_eq!(devices.len(), 2);
}
