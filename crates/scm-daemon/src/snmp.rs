//! SNMPv2c SET over UDP.
//!
//! Only what the demodulator's management interface needs: one SetRequest
//! carrying a single varbind of type INTEGER or Unsigned32, sent without
//! waiting for the response. The device applies the set or it doesn't; the
//! next scheduled retune tries again either way.
//!
//! ## Message layout (BER)
//!
//! ```text
//! SEQUENCE {
//!     version     INTEGER (1 = v2c)
//!     community   OCTET STRING
//!     [A3] SetRequest {
//!         request-id    INTEGER
//!         error-status  INTEGER (0)
//!         error-index   INTEGER (0)
//!         SEQUENCE OF SEQUENCE { name OID, value }
//!     }
//! }
//! ```

use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use scm_core::actuator::{Actuator, ActuatorError, Profile};
use scm_core::segments::Receiver;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_UNSIGNED32: u8 = 0x42;
const TAG_SET_REQUEST: u8 = 0xA3;

const VERSION_2C: i64 = 1;

/// Enterprise subtree of the demodulator's receiver table.
const DEVICE_RX_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 27928, 108, 1, 1];

// ─── OID ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Result<Self, String> {
        if arcs.len() < 2 {
            return Err("OID needs at least two arcs".into());
        }
        if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) || arcs[1] > u32::MAX - 80 {
            return Err(format!("invalid leading arcs {}.{}", arcs[0], arcs[1]));
        }
        Ok(Oid(arcs))
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// Tuner frequency of `profile` on `receiver`.
    pub fn tuner_frequency(receiver: Receiver, profile: Profile) -> Self {
        Self::device(&[u32::from(receiver.number()), u32::from(profile.id()) + 1, 1, 1])
    }

    /// Writing 0 here makes `profile` the active one on `receiver`.
    pub fn profile_activation(receiver: Receiver, profile: Profile) -> Self {
        Self::device(&[u32::from(receiver.number()), 3, u32::from(profile.id()) + 1])
    }

    /// Selects which receiver the device reports telemetry for.
    pub fn receiver_select() -> Self {
        Self::device(&[3, 1])
    }

    fn device(suffix: &[u32]) -> Self {
        Oid(DEVICE_RX_TABLE.iter().chain(suffix).copied().collect())
    }

    fn encode_content(&self, buf: &mut BytesMut) {
        put_base128(buf, self.0[0] * 40 + self.0[1]);
        for &arc in &self.0[2..] {
            put_base128(buf, arc);
        }
    }
}

impl FromStr for Oid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs = s
            .trim_start_matches('.')
            .split('.')
            .map(|arc| arc.parse::<u32>().map_err(|e| format!("bad arc {arc:?}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        Oid::new(arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for arc in &self.0 {
            write!(f, ".{arc}")?;
        }
        Ok(())
    }
}

// ─── Values & PDU ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Integer(i32),
    Unsigned32(u32),
}

/// A single-varbind SNMPv2c SetRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetRequest {
    pub community: String,
    pub request_id: i32,
    pub oid: Oid,
    pub value: Value,
}

impl SetRequest {
    pub fn encode(&self) -> Bytes {
        let mut name = BytesMut::new();
        self.oid.encode_content(&mut name);

        let mut varbind = BytesMut::new();
        put_tlv(&mut varbind, TAG_OID, &name);
        match self.value {
            Value::Integer(v) => put_integer(&mut varbind, TAG_INTEGER, i64::from(v)),
            Value::Unsigned32(v) => put_integer(&mut varbind, TAG_UNSIGNED32, i64::from(v)),
        }

        let mut varbinds = BytesMut::new();
        put_tlv(&mut varbinds, TAG_SEQUENCE, &varbind);

        let mut pdu = BytesMut::new();
        put_integer(&mut pdu, TAG_INTEGER, i64::from(self.request_id));
        put_integer(&mut pdu, TAG_INTEGER, 0);
        put_integer(&mut pdu, TAG_INTEGER, 0);
        put_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

        let mut message = BytesMut::new();
        put_integer(&mut message, TAG_INTEGER, VERSION_2C);
        put_tlv(&mut message, TAG_OCTET_STRING, self.community.as_bytes());
        put_tlv(&mut message, TAG_SET_REQUEST, &pdu);

        let mut out = BytesMut::with_capacity(message.len() + 4);
        put_tlv(&mut out, TAG_SEQUENCE, &message);
        out.freeze()
    }
}

// ─── BER primitives ──────────────────────────────────────────────────────────

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    buf.put_u8(0x80 | (bytes.len() - skip) as u8);
    buf.put_slice(&bytes[skip..]);
}

fn put_tlv(buf: &mut BytesMut, tag: u8, content: &[u8]) {
    buf.put_u8(tag);
    put_length(buf, content.len());
    buf.put_slice(content);
}

/// Minimal two's-complement encoding.
fn put_integer(buf: &mut BytesMut, tag: u8, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    put_tlv(buf, tag, &bytes[start..]);
}

fn put_base128(buf: &mut BytesMut, mut value: u32) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7F) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        buf.put_u8(groups[i] | continuation);
    }
}

// ─── Actuator ────────────────────────────────────────────────────────────────

/// Drives the demodulator with fire-and-forget SET requests.
#[derive(Debug)]
pub struct SnmpActuator {
    socket: UdpSocket,
    device: SocketAddr,
    community: String,
    profile: Profile,
    next_request_id: AtomicI32,
}

impl SnmpActuator {
    /// Frequencies are written to `profile`'s tuner.
    pub fn new(device: SocketAddr, community: String, profile: Profile) -> std::io::Result<Self> {
        let local: SocketAddr = if device.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            device,
            community,
            profile,
            next_request_id: AtomicI32::new(1),
        })
    }

    pub fn device(&self) -> SocketAddr {
        self.device
    }

    fn set(&self, oid: Oid, value: Value) -> Result<(), ActuatorError> {
        let request = SetRequest {
            community: self.community.clone(),
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX,
            oid,
            value,
        };
        let datagram = request.encode();
        self.socket.send_to(&datagram, self.device)?;
        tracing::debug!(
            device = %self.device,
            oid = %request.oid,
            value = ?request.value,
            request_id = request.request_id,
            "SNMP set sent"
        );
        Ok(())
    }
}

impl Actuator for SnmpActuator {
    fn retune(&self, receiver: Receiver, frequency: &str) -> Result<(), ActuatorError> {
        let value = frequency
            .parse::<u32>()
            .map_err(|e| ActuatorError::Encode(format!("frequency {frequency:?}: {e}")))?;
        self.set(
            Oid::tuner_frequency(receiver, self.profile),
            Value::Unsigned32(value),
        )
    }

    fn select_receiver(&self, receiver: Receiver) -> Result<(), ActuatorError> {
        self.set(
            Oid::receiver_select(),
            Value::Integer(i32::from(receiver.number())),
        )
    }

    fn activate_profile(&self, receiver: Receiver, profile: Profile) -> Result<(), ActuatorError> {
        self.set(Oid::profile_activation(receiver, profile), Value::Integer(0))
    }
}
