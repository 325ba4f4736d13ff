//! Metric ingestion handlers
//!
//! POST /v1/blockdelay, /v1/headdelay, /v1/aggregateattestation and
//! /v1/attestationsummary. Accepted metrics answer 201 with an empty body.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use probedb::db::{AggregateAttestation, AttestationSummary, Delay, DelayKind};

use super::source_ip::source_ip;
use super::types::{decode, AggregateAttestationRequest, AttestationSummaryRequest, DelayRequest};
use crate::error::ApiResult;
use crate::AppState;

fn probe_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> IpAddr {
    source_ip(headers, connect_info.map(|ConnectInfo(addr)| addr))
}

/// POST /v1/blockdelay
pub async fn post_block_delay(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    store_delay(&state, DelayKind::Block, probe_ip(&headers, connect_info), &body).await
}

/// POST /v1/headdelay
pub async fn post_head_delay(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    store_delay(&state, DelayKind::Head, probe_ip(&headers, connect_info), &body).await
}

async fn store_delay(state: &AppState, kind: DelayKind, ip_addr: IpAddr, body: &[u8]) -> ApiResult<StatusCode> {
    let request: DelayRequest = decode(body)?;

    let delay = Delay {
        ip_addr,
        source: request.source,
        method: request.method,
        slot: request.slot,
        delay_ms: request.delay_ms,
    };
    state.db.set_delay(None, kind, &delay).await?;

    tracing::trace!(
        kind = kind.as_str(),
        ip_addr = %delay.ip_addr,
        source = %delay.source,
        method = %delay.method,
        slot = delay.slot,
        delay_ms = delay.delay_ms,
        "Metric accepted"
    );
    Ok(StatusCode::CREATED)
}

/// POST /v1/aggregateattestation
pub async fn post_aggregate_attestation(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let request: AggregateAttestationRequest = decode(&body)?;

    let attestation = AggregateAttestation {
        ip_addr: probe_ip(&headers, connect_info),
        source: request.source,
        method: request.method,
        slot: request.slot,
        committee_index: request.committee_index,
        aggregation_bits: request.aggregation_bits,
        beacon_block_root: request.beacon_block_root,
        source_root: request.source_root,
        target_root: request.target_root,
        delay_ms: request.delay_ms,
    };
    state.db.set_aggregate_attestation(None, &attestation).await?;

    tracing::trace!(
        source = %attestation.source,
        slot = attestation.slot,
        committee_index = attestation.committee_index,
        delay_ms = attestation.delay_ms,
        "Metric accepted"
    );
    Ok(StatusCode::CREATED)
}

/// POST /v1/attestationsummary
///
/// Stores one summary per (vote, reporting source). Either all of them are
/// stored or none are.
pub async fn post_attestation_summary(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let request: AttestationSummaryRequest = decode(&body)?;
    let ip_addr = probe_ip(&headers, connect_info);

    let mut tx = state.db.begin_tx().await?;
    let mut stored = 0usize;
    for vote in request.attestations {
        for (source, attester_buckets) in vote.buckets {
            let summary = AttestationSummary {
                ip_addr,
                source,
                method: request.method.clone(),
                slot: request.slot,
                committee_index: vote.committee_index,
                beacon_block_root: vote.beacon_block_root.clone(),
                source_root: vote.source_root.clone(),
                target_root: vote.target_root.clone(),
                attester_buckets,
            };
            // Early return drops tx, rolling back earlier writes
            state.db.set_attestation_summary(Some(&mut tx), &summary).await?;
            stored += 1;
        }
    }
    state.db.commit_tx(tx).await?;

    tracing::trace!(
        method = %request.method,
        slot = request.slot,
        summaries = stored,
        "Metric accepted"
    );
    Ok(StatusCode::CREATED)
}

/// Build metric ingestion routes
pub fn metric_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/blockdelay", post(post_block_delay))
        .route("/v1/headdelay", post(post_head_delay))
        .route("/v1/aggregateattestation", post(post_aggregate_attestation))
        .route("/v1/attestationsummary", post(post_attestation_summary))
}
