//! Topology reads merged across every sensor's current snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::telemetry::{window_start, HoursQuery};
use super::{api_error, internal_error, ApiError, ApiState};
use crate::repository::TopologyScope;
use crate::types::{ObservationSet, TopologyRow, TopologyTable};

#[derive(Debug, Serialize, PartialEq)]
pub struct NearbyNetwork {
    pub panid: String,
    pub epid: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DeviceSummary {
    pub shortaddr: String,
    pub extendedaddr: String,
    pub nwkdevtype: String,
}

#[derive(Debug, Serialize)]
pub struct TopologyView {
    pub table: Vec<DeviceSummary>,
    /// Graphviz DOT source of the observed pairs.
    pub graph: String,
}

#[derive(Debug, Deserialize)]
pub struct ShortAddressQuery {
    pub panid: Option<String>,
}

/// `GET /api/nearby-networks`: one entry per PAN, with the extended PAN id
/// every sensor agrees on.
pub async fn nearby_networks(
    State(state): State<ApiState>,
) -> Result<Json<Vec<NearbyNetwork>>, ApiError> {
    let rows = state
        .repository
        .fetch_topology(TopologyTable::Networks, TopologyScope::All)
        .await
        .map_err(internal_error)?;

    let mut by_pan: BTreeMap<String, Vec<ObservationSet>> = BTreeMap::new();
    for row in rows {
        if let TopologyRow::Network(network) = row {
            by_pan.entry(network.panid).or_default().push(network.epidset);
        }
    }

    Ok(Json(
        by_pan
            .into_iter()
            .map(|(panid, sets)| NearbyNetwork {
                panid,
                epid: ObservationSet::merge(&sets).summary(),
            })
            .collect(),
    ))
}

/// `GET /api/pan-identifiers`
pub async fn pan_identifiers(State(state): State<ApiState>) -> Result<Json<Vec<String>>, ApiError> {
    let rows = state
        .repository
        .fetch_topology(TopologyTable::Networks, TopologyScope::All)
        .await
        .map_err(internal_error)?;

    let panids: BTreeSet<String> = rows
        .into_iter()
        .filter_map(|row| match row {
            TopologyRow::Network(network) => Some(network.panid),
            _ => None,
        })
        .collect();
    Ok(Json(panids.into_iter().collect()))
}

/// `GET /api/short-addresses?panid=`
pub async fn short_addresses(
    State(state): State<ApiState>,
    Query(query): Query<ShortAddressQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let panid = query
        .panid
        .filter(|p| !p.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing panid"))?;

    let rows = state
        .repository
        .fetch_topology(TopologyTable::ShortAddresses, TopologyScope::Pan(&panid))
        .await
        .map_err(internal_error)?;

    let addresses: BTreeSet<String> = rows
        .into_iter()
        .filter_map(|row| match row {
            TopologyRow::ShortAddress(device) => Some(device.shortaddr),
            _ => None,
        })
        .collect();
    Ok(Json(addresses.into_iter().collect()))
}

/// `GET /api/topology/:panid?hours=`: devices of a PAN and the pairs seen
/// talking within the window.
pub async fn topology(
    State(state): State<ApiState>,
    Path(panid): Path<String>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<TopologyView>, ApiError> {
    let since = window_start(query.hours.as_deref())?;

    let devices = state
        .repository
        .fetch_topology(TopologyTable::ShortAddresses, TopologyScope::Pan(&panid))
        .await
        .map_err(internal_error)?;
    let mut by_addr: BTreeMap<String, (Vec<ObservationSet>, Vec<ObservationSet>)> = BTreeMap::new();
    for row in devices {
        if let TopologyRow::ShortAddress(device) = row {
            let entry = by_addr.entry(device.shortaddr).or_default();
            entry.0.push(device.altset);
            entry.1.push(device.nwkset);
        }
    }
    let table: Vec<DeviceSummary> = by_addr
        .into_iter()
        .map(|(shortaddr, (altsets, nwksets))| DeviceSummary {
            shortaddr,
            extendedaddr: ObservationSet::merge(&altsets).summary(),
            nwkdevtype: ObservationSet::merge(&nwksets).summary(),
        })
        .collect();

    let pairs = state
        .repository
        .fetch_topology(TopologyTable::Pairs, TopologyScope::Pan(&panid))
        .await
        .map_err(internal_error)?;
    let mut edges: Vec<(String, String)> = Vec::new();
    for row in pairs {
        if let TopologyRow::Pair(pair) = row {
            let edge = (pair.srcaddr, pair.dstaddr);
            if pair.latest >= since && !edges.contains(&edge) {
                edges.push(edge);
            }
        }
    }

    let graph = render_graph(&table, &edges);
    Ok(Json(TopologyView { table, graph }))
}

fn fill_color(nwkdevtype: &str) -> &'static str {
    match nwkdevtype {
        "Zigbee Coordinator" => "#FF0000",
        "Zigbee Router" => "#FFA500",
        "Zigbee End Device" => "#FFFF00",
        _ => "#FFFFFF",
    }
}

fn render_graph(devices: &[DeviceSummary], edges: &[(String, String)]) -> String {
    let mut graph = String::from("digraph {\n");
    for device in devices {
        let _ = writeln!(
            graph,
            "\t\"{}\" [color=black fillcolor=\"{}\" fontname=\"DejaVu Sans Mono\" style=filled]",
            device.shortaddr,
            fill_color(&device.nwkdevtype)
        );
    }
    for (src, dst) in edges {
        let _ = writeln!(graph, "\t\"{}\" -> \"{}\"", src, dst);
    }
    graph.push_str("}\n");
    graph
}
