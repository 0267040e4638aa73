//! Keys-only query model.
//!
//! Queries are handed to the backend as-is; this module only describes them,
//! gives them a canonical text form for result caching and evaluates filters
//! against a property list for backends that scan.

use crate::{PropertyList, StorageKey, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const SECTION: &str = "====>";
const JOIN: &str = "^^";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOp {
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(FilterOp::Eq),
            ">" => Some(FilterOp::Gt),
            ">=" => Some(FilterOp::Ge),
            "<" => Some(FilterOp::Lt),
            "<=" => Some(FilterOp::Le),
            _ => None,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Ge => ordering != Ordering::Less,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(property: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            property: property.into(),
            op,
            value,
        }
    }

    /// True when any value stored under the property satisfies the filter.
    pub fn matches(&self, properties: &PropertyList) -> bool {
        properties
            .iter()
            .filter(|p| p.name == self.property)
            .filter_map(|p| p.value.compare(&self.value))
            .any(|ordering| self.op.accepts(ordering))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.property, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: String,
    pub shape: String,
    pub ancestor: Option<StorageKey>,
    pub filters: Vec<Filter>,
    /// Property to order by; a leading `-` sorts descending.
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_ancestor(mut self, ancestor: StorageKey) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(mut self, property: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter::new(property, op, value));
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_start_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn with_end_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.end_cursor = Some(cursor.into());
        self
    }

    /// Order property and whether it sorts descending.
    pub fn order_by(&self) -> Option<(&str, bool)> {
        self.order.as_deref().map(|o| match o.strip_prefix('-') {
            Some(property) => (property, true),
            None => (o, false),
        })
    }

    /// Whether every filter holds for the given properties.
    pub fn matches(&self, properties: &PropertyList) -> bool {
        self.filters.iter().all(|f| f.matches(properties))
    }

    /// Canonical text form. Equal queries produce equal strings.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(10 + self.filters.len() * 2);
        if let Some(ancestor) = &self.ancestor {
            parts.push(ancestor.encode());
        }
        parts.push(self.kind.clone());
        parts.push(SECTION.to_string());
        parts.push(self.shape.clone());
        parts.push(self.order.clone().unwrap_or_default());
        parts.push(self.limit.map(|l| l.to_string()).unwrap_or_default());
        parts.push(self.offset.to_string());
        parts.push(self.start_cursor.clone().unwrap_or_default());
        parts.push(self.end_cursor.clone().unwrap_or_default());
        if !self.filters.is_empty() {
            parts.push(SECTION.to_string());
            for (i, filter) in self.filters.iter().enumerate() {
                if i > 0 {
                    parts.push("|".to_string());
                }
                parts.push(filter.to_string());
            }
        }
        parts.join(JOIN)
    }
}

/// Keys returned by a query, with a cursor to resume after the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub keys: Vec<StorageKey>,
    pub cursor: Option<String>,
}

// =============================================================================
// TESTS
// =============================================================================
