//! Content identities: time-ordered 128-bit GUIDs and their generator.
//!
//! Identities use the RFC 4122 version-1 layout. The embedded timestamp is
//! what places an identity on its shard, so generation must be strictly
//! monotonic within one process: a single lock guards the last issued tick
//! and a 16-bit clock sequence that absorbs clock-granularity collisions
//! and clock regression.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Offset between the Gregorian epoch (1582-10-15) and the Unix epoch,
/// in 100 ns ticks.
const GREGORIAN_OFFSET: u64 = 0x01B2_1DD2_1381_4000;

/// A content identity: a time-ordered UUID independent of any path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(Uuid);

impl Guid {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from the canonical hyphenated string form.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidGuid(format!("{s}: {e}")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// The sortable value used for shard placement.
    ///
    /// This is *not* wall-clock time: the low 32 bits of the identity's
    /// most-significant word are reassembled so the coarse timestamp bits
    /// sort first. Lookup must use the same reassembly as generation.
    pub fn index_time(&self) -> i64 {
        let msb = u64::from_be_bytes(self.0.as_bytes()[..8].try_into().unwrap());
        let word = msb & 0xFFFF_FFFF;
        (((word & 0xFFFF) << 16) + (word >> 16)) as i64
    }

    /// Recover the wall-clock creation time in Unix milliseconds.
    pub fn epoch_time_ms(&self) -> i64 {
        let b = self.0.as_bytes();
        let time_low = u32::from_be_bytes(b[0..4].try_into().unwrap()) as u64;
        let time_mid = u16::from_be_bytes(b[4..6].try_into().unwrap()) as u64;
        let time_hi = (u16::from_be_bytes(b[6..8].try_into().unwrap()) & 0x0FFF) as u64;
        let tick = (time_hi << 48) | (time_mid << 32) | time_low;
        ((tick - GREGORIAN_OFFSET) / 10_000) as i64
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

impl std::str::FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

struct GeneratorState {
    last_tick: u64,
    clock_seq: u16,
}

/// Generator for time-ordered identities.
///
/// One factory per process is the intended use: the monotonicity guarantee
/// only holds across callers sharing the same factory.
pub struct GuidFactory {
    state: Mutex<GeneratorState>,
    node: [u8; 6],
}

impl GuidFactory {
    /// Create a factory using a local hardware address as the node id,
    /// with a random (multicast-bit) fallback when none is discoverable.
    pub fn new() -> Self {
        Self::with_node(hardware_node_id().unwrap_or_else(random_node_id))
    }

    /// Create a factory with an explicit node id.
    pub fn with_node(node: [u8; 6]) -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_tick: 0,
                clock_seq: std::process::id() as u16,
            }),
            node,
        }
    }

    /// Generate a fresh identity with the timestamp set to now.
    pub fn generate(&self) -> Guid {
        self.issue(current_tick())
    }

    /// Generate an identity with an explicit reference time (Unix millis),
    /// still applying the monotonicity guard against the last issued tick.
    pub fn generate_at(&self, reference_ms: i64) -> Guid {
        let tick = reference_ms as u64 * 10_000 + GREGORIAN_OFFSET + subtick_nanos();
        self.issue(tick)
    }

    fn issue(&self, computed: u64) -> Guid {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // A tick that is not strictly greater than the last issued one is
        // clamped to it and disambiguated by the clock sequence, keeping the
        // extracted ordering value non-decreasing even across clock regression.
        let tick = if computed <= state.last_tick {
            state.clock_seq = state.clock_seq.wrapping_add(1);
            state.last_tick
        } else {
            computed
        };
        state.last_tick = tick;

        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&((tick & 0xFFFF_FFFF) as u32).to_be_bytes());
        bytes[4..6].copy_from_slice(&(((tick >> 32) & 0xFFFF) as u16).to_be_bytes());
        bytes[6..8].copy_from_slice(&((((tick >> 48) & 0x0FFF) as u16) | 0x1000).to_be_bytes());
        bytes[8] = ((state.clock_seq >> 8) as u8 & 0x3F) | 0x80;
        bytes[9] = state.clock_seq as u8;
        bytes[10..16].copy_from_slice(&self.node);

        Guid(Uuid::from_bytes(bytes))
    }
}

impl Default for GuidFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn current_tick() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as u64 * 10_000 + GREGORIAN_OFFSET + (now.subsec_nanos() as u64 % 10_000)
}

fn subtick_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 10_000)
        .unwrap_or(0)
}

/// Scan the local network interfaces for a usable hardware address.
fn hardware_node_id() -> Option<[u8; 6]> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;

    for entry in entries.flatten() {
        if entry.file_name() == "lo" {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(entry.path().join("address")) else {
            continue;
        };
        if let Some(node) = parse_mac(raw.trim()) {
            if node != [0u8; 6] {
                return Some(node);
            }
        }
    }

    None
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut node = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut node {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(node)
}

/// Random node id with the multicast bit set, so it can never collide with
/// a real hardware address.
fn random_node_id() -> [u8; 6] {
    let mut node: [u8; 6] = rand::random();
    node[0] |= 0x01;
    node
}
