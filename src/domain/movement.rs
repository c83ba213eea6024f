use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

/// Signed unit count. Positive moves stock in, negative moves it out.
pub type Quantity = i64;

/// Largest magnitude a single movement may carry. Keeps negation exact and
/// leaves headroom for totals over millions of rows.
pub const MAX_MOVEMENT_QUANTITY: Quantity = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    /// Goods received (purchases, returns from customers)
    Inbound,
    /// Goods shipped (sales, consumption)
    Outbound,
    /// Stock count corrections, either sign
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "inbound",
            MovementType::Outbound => "outbound",
            MovementType::Adjustment => "adjustment",
        }
    }

    /// Also accepts the short forms and the Spanish vocabulary used by older
    /// ledger exports (`entrada`, `salida`, `ajuste`).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "inbound" | "in" | "entrada" => Some(MovementType::Inbound),
            "outbound" | "out" | "salida" => Some(MovementType::Outbound),
            "adjustment" | "adjust" | "ajuste" => Some(MovementType::Adjustment),
            _ => None,
        }
    }

    /// Whether `delta` has the sign this movement type requires.
    pub fn accepts(&self, delta: Quantity) -> bool {
        match self {
            MovementType::Inbound => delta > 0,
            MovementType::Outbound => delta < 0,
            MovementType::Adjustment => true,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single inventory movement. Records are immutable facts: a wrong count is
/// corrected by a later `Adjustment`, never by editing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub item_id: String,
    /// When the movement happened
    pub timestamp: DateTime<Utc>,
    pub quantity_delta: Quantity,
    pub movement_type: MovementType,
    pub warehouse_id: Option<String>,
    /// Cost per unit in cents, if the source carries it
    pub unit_cost: Option<Cents>,
    /// Position in the source file, used as the tie-break for equal timestamps
    pub sequence: u64,
}

impl MovementRecord {
    /// Build a validated record. The sequence number is assigned by the loader.
    pub fn new(
        item_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        quantity_delta: Quantity,
        movement_type: MovementType,
    ) -> Result<Self, MovementError> {
        let item_id = item_id.into();
        if item_id.trim().is_empty() {
            return Err(MovementError::EmptyItemId);
        }
        if quantity_delta.unsigned_abs() > MAX_MOVEMENT_QUANTITY.unsigned_abs() {
            return Err(MovementError::OutOfRange { quantity_delta });
        }
        if !movement_type.accepts(quantity_delta) {
            return Err(MovementError::SignMismatch {
                movement_type,
                quantity_delta,
            });
        }

        Ok(Self {
            item_id,
            timestamp,
            quantity_delta,
            movement_type,
            warehouse_id: None,
            unit_cost: None,
            sequence: 0,
        })
    }

    pub fn with_warehouse(mut self, warehouse_id: impl Into<String>) -> Self {
        self.warehouse_id = Some(warehouse_id.into());
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Cents) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Units received by this movement (0 for outgoing deltas).
    pub fn inbound_units(&self) -> Quantity {
        self.quantity_delta.max(0)
    }

    /// Units shipped by this movement, as a positive magnitude.
    pub fn outbound_units(&self) -> Quantity {
        self.quantity_delta.min(0).saturating_neg()
    }

    /// Value of the movement at its unit cost, if known.
    pub fn extended_cost(&self) -> Option<Cents> {
        self.unit_cost
            .and_then(|cost| cost.checked_mul(self.quantity_delta))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementError {
    EmptyItemId,
    SignMismatch {
        movement_type: MovementType,
        quantity_delta: Quantity,
    },
    OutOfRange {
        quantity_delta: Quantity,
    },
}

impl std::fmt::Display for MovementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MovementError::EmptyItemId => write!(f, "item id must not be empty"),
            MovementError::SignMismatch {
                movement_type,
                quantity_delta,
            } => write!(
                f,
                "quantity {} does not match movement type {} (inbound must be positive, outbound negative)",
                quantity_delta, movement_type
            ),
            MovementError::OutOfRange { quantity_delta } => write!(
                f,
                "quantity {} exceeds the per-movement limit of {}",
                quantity_delta, MAX_MOVEMENT_QUANTITY
            ),
        }
    }
}

impl std::error::Error for MovementError {}
