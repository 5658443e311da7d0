//! Order status enum and the wire-code mapping used by stage workers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an order.
///
/// `Ordered`, `Assembled` and `Baked` are in-flight; every other variant is terminal
/// and retires the order from liveness tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unknown,
    Ordered,
    Assembled,
    Baked,
    Delivered,
    Cancelled,
    Stuck,
    SomethingWrong,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Unknown,
        OrderStatus::Ordered,
        OrderStatus::Assembled,
        OrderStatus::Baked,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Stuck,
        OrderStatus::SomethingWrong,
    ];

    /// Stable lowercase label, used as the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Unknown => "unknown",
            OrderStatus::Ordered => "ordered",
            OrderStatus::Assembled => "assembled",
            OrderStatus::Baked => "baked",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Stuck => "stuck",
            OrderStatus::SomethingWrong => "something_wrong",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, OrderStatus::Ordered | OrderStatus::Assembled | OrderStatus::Baked)
    }

    /// Position along the happy path, `None` for statuses off the pipeline.
    pub fn pipeline_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Ordered => Some(1),
            OrderStatus::Assembled => Some(2),
            OrderStatus::Baked => Some(3),
            OrderStatus::Delivered => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unrecognized order status label: {s}"))
    }
}

/// Bidirectional mapping between [`OrderStatus`] and the integer codes carried in
/// event payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodes {
    by_status: HashMap<OrderStatus, i64>,
    by_code: HashMap<i64, OrderStatus>,
}

impl StatusCodes {
    /// Build from a label → code table. Every status must be present and codes must be unique.
    pub fn from_labels(table: &BTreeMap<String, i64>) -> Result<Self, String> {
        let mut by_status = HashMap::new();
        let mut by_code = HashMap::new();

        for (label, code) in table {
            let status = label.parse::<OrderStatus>()?;
            if let Some(previous) = by_code.insert(*code, status) {
                return Err(format!("status code {code} is assigned to both '{previous}' and '{status}'"));
            }
            by_status.insert(status, *code);
        }

        let missing: Vec<&str> = OrderStatus::ALL
            .iter()
            .filter(|s| !by_status.contains_key(s))
            .map(|s| s.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing status codes for: {}", missing.join(", ")));
        }

        Ok(Self { by_status, by_code })
    }

    pub fn code_of(&self, status: OrderStatus) -> i64 {
        // from_labels guarantees totality
        self.by_status.get(&status).copied().unwrap_or_default()
    }

    pub fn status_of(&self, code: i64) -> Option<OrderStatus> {
        self.by_code.get(&code).copied()
    }

    /// Label for a raw code, falling back to `unknown` for unmapped codes.
    pub fn label_of(&self, code: i64) -> &'static str {
        self.status_of(code).unwrap_or(OrderStatus::Unknown).as_str()
    }

    pub fn default_labels() -> BTreeMap<String, i64> {
        [
            (OrderStatus::Unknown, 0),
            (OrderStatus::Ordered, 100),
            (OrderStatus::Assembled, 200),
            (OrderStatus::Baked, 300),
            (OrderStatus::Delivered, 400),
            (OrderStatus::Cancelled, 500),
            (OrderStatus::Stuck, 600),
            (OrderStatus::SomethingWrong, 999),
        ]
        .into_iter()
        .map(|(status, code)| (status.as_str().to_string(), code))
        .collect()
    }
}

impl Default for StatusCodes {
    fn default() -> Self {
        let by_status: HashMap<OrderStatus, i64> = Self::default_labels()
            .into_iter()
            .filter_map(|(label, code)| label.parse().ok().map(|s| (s, code)))
            .collect();
        let by_code = by_status.iter().map(|(s, c)| (*c, *s)).collect();
        Self { by_status, by_code }
    }
}
