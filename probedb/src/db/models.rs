//! Database models
//!
//! The four persisted record kinds. None of them carries a surrogate id;
//! each is identified by its natural composite key.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::JsonContext;
use crate::{Error, Result};

/// Number of time buckets recorded per reporting source in an attestation summary
pub const ATTESTER_BUCKETS: usize = 120;

/// Reduce an IPv4-mapped IPv6 address to its IPv4 form.
///
/// Every other address is returned unchanged. Applied on write, on read and
/// to filter values so that comparisons always see the same representation.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        IpAddr::V4(_) => ip,
    }
}

/// Ordering key of an address: a family byte followed by the octets
///
/// Compared bytewise, IPv4 sorts before IPv6 and addresses of one family
/// sort by numeric value. Stored next to the canonical text so readers can
/// break ties by address.
pub(crate) fn ip_sort_key(ip: IpAddr) -> Vec<u8> {
    match normalize_ip(ip) {
        IpAddr::V4(v4) => [&[4u8][..], &v4.octets()[..]].concat(),
        IpAddr::V6(v6) => [&[6u8][..], &v6.octets()[..]].concat(),
    }
}

/// Which delay table a [`Delay`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayKind {
    /// Delay between slot start and block arrival
    Block,
    /// Delay between slot start and head change
    Head,
}

impl DelayKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            DelayKind::Block => "t_block_delays",
            DelayKind::Head => "t_head_delays",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DelayKind::Block => "block",
            DelayKind::Head => "head",
        }
    }
}

/// A single delay observation
///
/// Keyed by (ip_addr, source, method, slot). Rewriting the same key
/// replaces `delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delay {
    pub ip_addr: IpAddr,
    /// Name of the reporting beacon node
    pub source: String,
    /// Collection method (e.g. "head event")
    pub method: String,
    pub slot: u32,
    pub delay_ms: u32,
}

/// Result row of a delay query
///
/// For aggregate selections only `slot` and `delay_ms` are set; the origin
/// fields are populated for `Selection::All`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelayValue {
    pub slot: u32,
    pub delay_ms: u32,
    pub ip_addr: Option<IpAddr>,
    pub source: Option<String>,
    pub method: Option<String>,
}

impl DelayValue {
    pub(crate) fn aggregate(slot: u32, delay_ms: u32) -> Self {
        Self {
            slot,
            delay_ms,
            ip_addr: None,
            source: None,
            method: None,
        }
    }
}

impl From<Delay> for DelayValue {
    fn from(delay: Delay) -> Self {
        Self {
            slot: delay.slot,
            delay_ms: delay.delay_ms,
            ip_addr: Some(delay.ip_addr),
            source: Some(delay.source),
            method: Some(delay.method),
        }
    }
}

/// An aggregate attestation as seen by a probe
///
/// Keyed by (ip_addr, source, method, slot, committee_index,
/// aggregation_bits). The first write for a key is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateAttestation {
    pub ip_addr: IpAddr,
    pub source: String,
    pub method: String,
    pub slot: u32,
    pub committee_index: u16,
    pub aggregation_bits: Vec<u8>,
    pub beacon_block_root: Vec<u8>,
    pub source_root: Vec<u8>,
    pub target_root: Vec<u8>,
    pub delay_ms: u32,
}

/// Summary of which attesters had been seen by each time bucket
///
/// Keyed by (ip_addr, source, method, slot, committee_index,
/// beacon_block_root, source_root, target_root). The first write for a
/// key is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationSummary {
    pub ip_addr: IpAddr,
    pub source: String,
    pub method: String,
    pub slot: u32,
    pub committee_index: u16,
    pub beacon_block_root: Vec<u8>,
    pub source_root: Vec<u8>,
    pub target_root: Vec<u8>,
    pub attester_buckets: AttesterBuckets,
}

/// Fixed-size vector of raw bit-vectors, one per time bucket
///
/// Always holds exactly [`ATTESTER_BUCKETS`] entries. A bucket with no
/// data is an empty vector, never a missing entry. The bucket index is
/// treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<u8>>", into = "Vec<Vec<u8>>")]
pub struct AttesterBuckets(Vec<Vec<u8>>);

impl AttesterBuckets {
    /// All buckets empty
    pub fn new() -> Self {
        Self(vec![Vec::new(); ATTESTER_BUCKETS])
    }

    /// Build from sparse (index, bits) pairs; unlisted buckets stay empty
    pub fn from_sparse<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, Vec<u8>)>,
    {
        let mut buckets = Self::new();
        for (index, bits) in entries {
            buckets.set(index, bits)?;
        }
        Ok(buckets)
    }

    pub fn set(&mut self, index: usize, bits: Vec<u8>) -> Result<()> {
        let slot = self.0.get_mut(index).ok_or_else(|| {
            Error::InvalidInput(format!(
                "bucket index {} out of range (max {})",
                index,
                ATTESTER_BUCKETS - 1
            ))
        })?;
        *slot = bits;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }

    /// Number of buckets holding any data
    pub fn populated(&self) -> usize {
        self.0.iter().filter(|b| !b.is_empty()).count()
    }

    pub fn into_inner(self) -> Vec<Vec<u8>> {
        self.0
    }

    /// Encode as a JSON array of `0x`-prefixed hex strings
    pub(crate) fn to_column(&self) -> Result<String> {
        let encoded: Vec<String> = self.0.iter().map(|b| format!("0x{}", hex::encode(b))).collect();
        serde_json::to_string(&encoded).json_context("failed to encode attester buckets")
    }

    /// Decode the stored column; anything other than exactly 120 valid
    /// hex entries is a corrupt row
    pub(crate) fn from_column(value: &str) -> Result<Self> {
        let encoded: Vec<String> =
            serde_json::from_str(value).json_context("failed to decode attester buckets")?;
        if encoded.len() != ATTESTER_BUCKETS {
            return Err(Error::CorruptRow(format!(
                "expected {} attester buckets, found {}",
                ATTESTER_BUCKETS,
                encoded.len()
            )));
        }
        let buckets = encoded
            .iter()
            .map(|entry| {
                hex::decode(entry.strip_prefix("0x").unwrap_or(entry))
                    .map_err(|e| Error::CorruptRow(format!("invalid attester bucket {:?}: {}", entry, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(buckets))
    }
}

impl Default for AttesterBuckets {
    fn default() -> Self {
        Self::new()
    }
}

/// Dense input: shorter vectors are padded with empty buckets, longer
/// vectors are rejected
impl TryFrom<Vec<Vec<u8>>> for AttesterBuckets {
    type Error = Error;

    fn try_from(mut buckets: Vec<Vec<u8>>) -> Result<Self> {
        if buckets.len() > ATTESTER_BUCKETS {
            return Err(Error::InvalidInput(format!(
                "too many attester buckets: {} (max {})",
                buckets.len(),
                ATTESTER_BUCKETS
            )));
        }
        buckets.resize(ATTESTER_BUCKETS, Vec::new());
        Ok(Self(buckets))
    }
}

impl From<AttesterBuckets> for Vec<Vec<u8>> {
    fn from(buckets: AttesterBuckets) -> Self {
        buckets.0
    }
}
