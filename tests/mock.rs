#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;

use lwnsim_device::activation::JoinRequest;
use lwnsim_device::config::{AESKey, DevAddr, DeviceConfig, EUI64};
use lwnsim_device::crypto::{self, Direction};
use lwnsim_device::device::status::Session;
use lwnsim_device::device::Device;
use lwnsim_device::lorawan::mac::{DataFrame, FCtrl, MType, FHDR};
use lwnsim_device::radio::Transport;
use lwnsim_device::sink::{DeviceEvent, EventSink};

pub const APP_KEY: AESKey = AESKey::new([
    0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
]);
pub const DEV_ADDR: DevAddr = DevAddr::new([0x26, 0x01, 0x1B, 0xDA]);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config(name: &str) -> DeviceConfig {
    let mut config = DeviceConfig::new_otaa(
        name,
        EUI64::new([0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1C, 0x05, 0x30]),
        EUI64::new([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x00]),
        APP_KEY,
    );
    config.payload = b"hello".to_vec();
    config.send_interval_ms = 1_000;
    config
}

/// Mock transport error
#[derive(Debug, thiserror::Error)]
#[error("mock transport failure")]
pub struct MockError;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct Shared {
    sent: Vec<Vec<u8>>,
    queue: VecDeque<Vec<u8>>,
}

/// Test side view of a [`MockTransport`]
#[derive(Clone, Default)]
pub struct MockLink {
    shared: Arc<Mutex<Shared>>,
}

impl MockLink {
    /// Queue a frame for the device
    pub fn push_downlink(&self, frame: Vec<u8>) {
        self.shared.lock().unwrap().queue.push_back(frame);
    }

    /// Frames sent by the device so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.lock().unwrap().sent.clone()
    }

    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.shared.lock().unwrap().sent.last().cloned()
    }

    pub fn clear_sent(&self) {
        self.shared.lock().unwrap().sent.clear();
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().unwrap().queue.len()
    }
}

/// Mock transport for testing
pub struct MockTransport {
    link: MockLink,
    responder: Option<Responder>,
}

impl MockTransport {
    /// Create new mock transport
    pub fn new() -> (Self, MockLink) {
        let link = MockLink::default();
        (
            Self {
                link: link.clone(),
                responder: None,
            },
            link,
        )
    }

    /// Frames returned by `responder` are queued after every send
    pub fn with_responder<F>(responder: F) -> (Self, MockLink)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let (mut transport, link) = Self::new();
        transport.responder = Some(Box::new(responder));
        (transport, link)
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        let replies = match self.responder.as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        let mut shared = self.link.shared.lock().unwrap();
        shared.sent.push(frame.to_vec());
        shared.queue.extend(replies);
        Ok(())
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        self.link.shared.lock().unwrap().queue.pop_front()
    }
}

/// Sink keeping every event in memory
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Status lines, errors only when `errors` is set
    pub fn messages(&self, errors: bool) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::Status {
                    message, is_error, ..
                } if is_error == errors => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages(true)
    }

    pub fn downlinks(&self) -> Vec<(u8, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::DownlinkReceived { fport, payload, .. } => Some((fport, payload)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn status(&self, name: &str, message: &str, is_error: bool) {
        self.events.lock().unwrap().push(DeviceEvent::Status {
            name: name.to_string(),
            message: message.to_string(),
            is_error,
        });
    }

    fn downlink_received(&self, name: &str, timestamp_ms: u64, fport: u8, payload: &[u8]) {
        self.events.lock().unwrap().push(DeviceEvent::DownlinkReceived {
            name: name.to_string(),
            timestamp_ms,
            fport,
            payload: payload.to_vec(),
        });
    }

    fn uplink_sent(&self, name: &str, timestamp_ms: u64, frame: &[u8]) {
        self.events.lock().unwrap().push(DeviceEvent::UplinkSent {
            name: name.to_string(),
            timestamp_ms,
            frame: frame.to_vec(),
        });
    }
}

/// Encrypted join accept as a network server would build it
pub fn join_accept(app_key: &AESKey, dev_addr: DevAddr, cf_list: Option<[u8; 16]>) -> Vec<u8> {
    let mut plain = vec![0x01, 0x02, 0x03, 0x13, 0x00, 0x00];
    plain.extend_from_slice(&dev_addr.to_wire());
    plain.push(0x00); // DLSettings
    plain.push(0x01); // RxDelay
    if let Some(list) = cf_list {
        plain.extend_from_slice(&list);
    }

    let mut signed = vec![MType::JoinAccept.to_mhdr()];
    signed.extend_from_slice(&plain);
    plain.extend_from_slice(&crypto::compute_join_accept_mic(app_key, &signed));

    let cipher = Aes128::new(GenericArray::from_slice(app_key.as_bytes()));
    for block in plain.chunks_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let mut frame = vec![MType::JoinAccept.to_mhdr()];
    frame.extend_from_slice(&plain);
    frame
}

/// Responder answering every join request with a join accept under `app_key`
pub fn join_server(app_key: AESKey) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send {
    move |frame| match JoinRequest::parse(frame) {
        Ok(_) => vec![join_accept(&app_key, DEV_ADDR, None)],
        Err(_) => Vec::new(),
    }
}

/// Downlink content for [`build_downlink`]
#[derive(Clone, Default)]
pub struct Downlink {
    pub confirmed: bool,
    pub fcnt: u16,
    pub ack: bool,
    pub fpending: bool,
    pub fopts: Vec<u8>,
    pub fport: Option<u8>,
    pub payload: Vec<u8>,
}

/// Signed and encrypted downlink for `session`
pub fn build_downlink(session: &Session, downlink: &Downlink) -> Vec<u8> {
    let frm_payload = match downlink.fport {
        Some(port) => {
            let key = if port == 0 {
                &session.nwk_skey
            } else {
                &session.app_skey
            };
            crypto::encrypt_frm_payload(
                key,
                session.dev_addr,
                downlink.fcnt as u32,
                Direction::Down,
                &downlink.payload,
            )
            .unwrap()
        }
        None => heapless::Vec::new(),
    };

    let mut frame = DataFrame {
        mtype: if downlink.confirmed {
            MType::ConfirmedDataDown
        } else {
            MType::UnconfirmedDataDown
        },
        fhdr: FHDR {
            dev_addr: session.dev_addr,
            f_ctrl: FCtrl {
                adr: false,
                adr_ack_req: false,
                ack: downlink.ack,
                f_pending: downlink.fpending,
                f_opts_len: downlink.fopts.len() as u8,
            },
            f_cnt: downlink.fcnt,
            f_opts: heapless::Vec::from_slice(&downlink.fopts).unwrap(),
        },
        f_port: downlink.fport,
        frm_payload,
        mic: [0; 4],
    };
    frame.to_bytes(&session.nwk_skey).unwrap().to_vec()
}

/// Decode an uplink sent by the device
pub fn parse_uplink(frame: &[u8]) -> DataFrame {
    DataFrame::parse(frame).unwrap()
}

pub type TestDevice = Device<MockTransport, RecordingSink>;

/// Device joined through [`join_server`], with the join exchange cleared
pub fn joined_device(config: DeviceConfig) -> (TestDevice, MockLink, RecordingSink) {
    let (transport, link) = MockTransport::with_responder(join_server(APP_KEY));
    let sink = RecordingSink::default();
    let mut device = Device::new(config, transport, sink.clone());
    device.otaa_activation().unwrap();
    link.clear_sent();
    (device, link, sink)
}

/// Session of a joined device
pub fn session_of(device: &TestDevice) -> Session {
    device.status().session.clone().unwrap()
}
