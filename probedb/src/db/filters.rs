//! Query filters
//!
//! Filter fields are ANDed together. Empty strings, empty lists and `None`
//! impose no constraint. `from`/`to` are inclusive slot bounds.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;

use crate::{Error, Result};

/// Order in which matching rows are fetched and returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Order {
    /// Ascending slot
    #[default]
    Earliest,
    /// Descending slot
    Latest,
}

impl Order {
    pub fn as_str(self) -> &'static str {
        match self {
            Order::Earliest => "earliest",
            Order::Latest => "latest",
        }
    }

    pub(crate) fn direction(self) -> &'static str {
        match self {
            Order::Earliest => "ASC",
            Order::Latest => "DESC",
        }
    }
}

impl FromStr for Order {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(Order::Earliest),
            "latest" => Ok(Order::Latest),
            _ => Err(Error::UnknownOrder(s.to_string())),
        }
    }
}

impl TryFrom<String> for Order {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<u8> for Order {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Order::Earliest),
            1 => Ok(Order::Latest),
            other => Err(Error::UnknownOrder(other.to_string())),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How delays for the same slot are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Selection {
    /// Smallest delay per slot
    #[default]
    Minimum,
    /// Largest delay per slot
    Maximum,
    /// Continuous 50th percentile per slot
    Median,
    /// Every stored row, ungrouped
    All,
}

impl Selection {
    pub fn as_str(self) -> &'static str {
        match self {
            Selection::Minimum => "minimum",
            Selection::Maximum => "maximum",
            Selection::Median => "median",
            Selection::All => "all",
        }
    }
}

impl FromStr for Selection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "minimum" => Ok(Selection::Minimum),
            "maximum" => Ok(Selection::Maximum),
            "median" => Ok(Selection::Median),
            "all" => Ok(Selection::All),
            _ => Err(Error::UnknownSelection(s.to_string())),
        }
    }
}

impl TryFrom<String> for Selection {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<u8> for Selection {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Selection::Minimum),
            1 => Ok(Selection::Maximum),
            2 => Ok(Selection::Median),
            3 => Ok(Selection::All),
            other => Err(Error::UnknownSelection(other.to_string())),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter for block and head delays
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DelayFilter {
    /// Probe address; IPv4-mapped addresses match their IPv4 form
    pub ip_addr: Option<IpAddr>,
    /// Reporting beacon node
    pub source: Option<String>,
    /// Collection method
    pub method: Option<String>,
    /// Earliest slot, inclusive
    pub from: Option<u32>,
    /// Latest slot, inclusive
    pub to: Option<u32>,
    pub order: Order,
    pub selection: Selection,
}

/// Filter for aggregate attestations
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AggregateAttestationFilter {
    pub ip_addr: Option<IpAddr>,
    /// Any of these reporting beacon nodes
    pub sources: Vec<String>,
    /// Any of these collection methods
    pub methods: Vec<String>,
    pub from: Option<u32>,
    pub to: Option<u32>,
    pub order: Order,
    /// Maximum number of rows; 0 is unlimited
    pub limit: u32,
}

/// Filter for attestation summaries
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AttestationSummaryFilter {
    pub ip_addr: Option<IpAddr>,
    pub sources: Vec<String>,
    pub methods: Vec<String>,
    pub from: Option<u32>,
    pub to: Option<u32>,
    pub order: Order,
    /// Maximum number of rows; 0 is unlimited
    pub limit: u32,
}
