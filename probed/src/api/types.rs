//! Request bodies
//!
//! Probes send numbers as decimal strings and byte strings as
//! `0x`-prefixed hex. Each body is first read into its raw JSON form and
//! then validated into the typed request, so a missing or malformed field
//! fails deserialisation with a message naming the field.

use std::collections::BTreeMap;
use std::str::FromStr;

use probedb::db::AttesterBuckets;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ApiError;

/// Decode a JSON request body, mapping any failure to 400
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn required(field: &str, value: Option<String>) -> Result<String, String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(format!("{} missing", field)),
    }
}

fn decimal<T: FromStr>(field: &str, value: Option<String>) -> Result<T, String> {
    required(field, value)?
        .parse()
        .map_err(|_| format!("invalid value for {}", field))
}

fn hex_bytes(field: &str, value: &str) -> Result<Vec<u8>, String> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| format!("invalid value for {}: {}", field, e))
}

fn required_hex(field: &str, value: Option<String>) -> Result<Vec<u8>, String> {
    hex_bytes(field, &required(field, value)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DelayJson {
    source: Option<String>,
    method: Option<String>,
    slot: Option<String>,
    delay_ms: Option<String>,
}

/// POST /v1/blockdelay and /v1/headdelay body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "DelayJson")]
pub struct DelayRequest {
    pub source: String,
    pub method: String,
    pub slot: u32,
    pub delay_ms: u32,
}

impl TryFrom<DelayJson> for DelayRequest {
    type Error = String;

    fn try_from(data: DelayJson) -> Result<Self, String> {
        Ok(Self {
            source: required("source", data.source)?,
            method: required("method", data.method)?,
            slot: decimal("slot", data.slot)?,
            delay_ms: decimal("delay_ms", data.delay_ms)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AggregateAttestationJson {
    source: Option<String>,
    method: Option<String>,
    slot: Option<String>,
    committee_index: Option<String>,
    aggregation_bits: Option<String>,
    beacon_block_root: Option<String>,
    source_root: Option<String>,
    target_root: Option<String>,
    delay_ms: Option<String>,
}

/// POST /v1/aggregateattestation body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AggregateAttestationJson")]
pub struct AggregateAttestationRequest {
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

impl TryFrom<AggregateAttestationJson> for AggregateAttestationRequest {
    type Error = String;

    fn try_from(data: AggregateAttestationJson) -> Result<Self, String> {
        Ok(Self {
            source: required("source", data.source)?,
            method: required("method", data.method)?,
            slot: decimal("slot", data.slot)?,
            committee_index: decimal("committee_index", data.committee_index)?,
            aggregation_bits: required_hex("aggregation_bits", data.aggregation_bits)?,
            beacon_block_root: required_hex("beacon_block_root", data.beacon_block_root)?,
            source_root: required_hex("source_root", data.source_root)?,
            target_root: required_hex("target_root", data.target_root)?,
            delay_ms: decimal("delay_ms", data.delay_ms)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttestationSummaryJson {
    method: Option<String>,
    slot: Option<String>,
    attestations: Option<Vec<VoteJson>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VoteJson {
    committee_index: Option<String>,
    beacon_block_root: Option<String>,
    source_root: Option<String>,
    target_root: Option<String>,
    buckets: BTreeMap<String, Vec<String>>,
}

/// POST /v1/attestationsummary body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AttestationSummaryJson")]
pub struct AttestationSummaryRequest {
    pub method: String,
    pub slot: u32,
    pub attestations: Vec<Vote>,
}

/// Attestations sharing one vote, with per-source arrival buckets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub committee_index: u16,
    pub beacon_block_root: Vec<u8>,
    pub source_root: Vec<u8>,
    pub target_root: Vec<u8>,
    /// Reporting source to its buckets
    pub buckets: BTreeMap<String, AttesterBuckets>,
}

impl TryFrom<AttestationSummaryJson> for AttestationSummaryRequest {
    type Error = String;

    fn try_from(data: AttestationSummaryJson) -> Result<Self, String> {
        let attestations = data
            .attestations
            .ok_or_else(|| "attestations missing".to_string())?
            .into_iter()
            .map(Vote::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            method: required("method", data.method)?,
            slot: decimal("slot", data.slot)?,
            attestations,
        })
    }
}

impl TryFrom<VoteJson> for Vote {
    type Error = String;

    fn try_from(data: VoteJson) -> Result<Self, String> {
        if data.buckets.is_empty() {
            return Err("buckets missing".to_string());
        }
        let buckets = data
            .buckets
            .into_iter()
            .map(|(source, entries)| -> Result<(String, AttesterBuckets), String> {
                let dense = entries
                    .iter()
                    .map(|entry| hex_bytes("buckets", entry))
                    .collect::<Result<Vec<_>, _>>()?;
                let buckets = AttesterBuckets::try_from(dense).map_err(|e| e.to_string())?;
                Ok((source, buckets))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self {
            committee_index: decimal("committee_index", data.committee_index)?,
            beacon_block_root: required_hex("beacon_block_root", data.beacon_block_root)?,
            source_root: required_hex("source_root", data.source_root)?,
            target_root: required_hex("target_root", data.target_root)?,
            buckets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_request_parses_decimal_strings() {
        let request: DelayRequest = decode(
            br#"{"source":"client","method":"head event","slot":"123","delay_ms":"12345"}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            DelayRequest {
                source: "client".to_string(),
                method: "head event".to_string(),
                slot: 123,
                delay_ms: 12345,
            }
        );
    }

    #[test]
    fn test_delay_request_reports_missing_field() {
        let err = decode::<DelayRequest>(br#"{"source":"client","method":"m","slot":"1"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("delay_ms missing"), "{}", err);
    }

    #[test]
    fn test_delay_request_rejects_out_of_range_slot() {
        let err = decode::<DelayRequest>(
            br#"{"source":"c","method":"m","slot":"4294967296","delay_ms":"1"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid value for slot"), "{}", err);
    }

    #[test]
    fn test_aggregate_attestation_rejects_bad_hex() {
        let err = decode::<AggregateAttestationRequest>(
            br#"{"source":"c","method":"m","slot":"1","committee_index":"2","aggregation_bits":"0xzz",
                "beacon_block_root":"0x01","source_root":"0x02","target_root":"0x03","delay_ms":"5"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("aggregation_bits"), "{}", err);
    }

    #[test]
    fn test_summary_buckets_are_padded_and_empty_strings_allowed() {
        let request: AttestationSummaryRequest = decode(
            br#"{"method":"gossip","slot":"10","attestations":[{"committee_index":"1",
                "beacon_block_root":"0x01","source_root":"0x02","target_root":"0x03",
                "buckets":{"a":["0x01","","0x"],"b":["ff"]}}]}"#,
        )
        .unwrap();
        let vote = &request.attestations[0];
        let a = &vote.buckets["a"];
        assert_eq!(a.iter().count(), 120);
        assert_eq!(a.get(0), Some(&[0x01][..]));
        assert!(a.get(1).unwrap().is_empty());
        assert!(a.get(2).unwrap().is_empty());
        assert_eq!(vote.buckets["b"].get(0), Some(&[0xff][..]));
    }

    #[test]
    fn test_summary_rejects_too_many_buckets() {
        let entries = vec!["\"0x01\""; 121].join(",");
        let body = format!(
            r#"{{"method":"m","slot":"1","attestations":[{{"committee_index":"1","beacon_block_root":"0x01",
                "source_root":"0x02","target_root":"0x03","buckets":{{"a":[{}]}}}}]}}"#,
            entries
        );
        assert!(decode::<AttestationSummaryRequest>(body.as_bytes()).is_err());
    }

    #[test]
    fn test_summary_requires_attestations() {
        let err = decode::<AttestationSummaryRequest>(br#"{"method":"m","slot":"1"}"#).unwrap_err();
        assert!(err.to_string().contains("attestations missing"), "{}", err);
    }
}
