//! # Domain Types
//!
//! The three classes of record the client synchronizes with the backend.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │    Product      │   │    Customer     │   │    Transaction      │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  name           │   │  name           │   │  receipt_number     │   │
//! │  │  sku            │   │  email          │   │  customer_local_id ─┼─► │
//! │  │  price_cents    │   │  phone          │   │  lines[] ───────────┼─► │
//! │  │  is_active      │   │  loyalty_points │   │  total_cents        │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! │                                                                         │
//! │  Transactions reference products and customers by LOCAL id, so they   │
//! │  must sync after them: Products → Customers → Transactions.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Integer Money
//! All monetary values are in cents (i64). A price of 9.99 is `999`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Entity Type
// =============================================================================

/// A class of synchronized record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Customer,
    Transaction,
}

impl EntityType {
    /// Dependency order of a sync pass. Transactions reference products and
    /// customers, so the backend must know those first.
    pub const SYNC_ORDER: [EntityType; 3] = [
        EntityType::Product,
        EntityType::Customer,
        EntityType::Transaction,
    ];

    /// Returns the snake_case name used in storage and URLs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Customer => "customer",
            EntityType::Transaction => "transaction",
        }
    }

    /// Transactions are immutable once created; only their sync metadata
    /// may change.
    pub const fn is_immutable(&self) -> bool {
        matches!(self, EntityType::Transaction)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" | "products" | "item" => Ok(EntityType::Product),
            "customer" | "customers" => Ok(EntityType::Customer),
            "transaction" | "transactions" | "sale" => Ok(EntityType::Transaction),
            other => Err(CoreError::UnknownEntityType(other.to_string())),
        }
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Stock Keeping Unit - business identifier.
    #[serde(default)]
    pub sku: Option<String>,

    /// Barcode (EAN-13, UPC-A, etc.).
    #[serde(default)]
    pub barcode: Option<String>,

    /// Price in cents (smallest currency unit).
    pub price_cents: i64,

    /// Tax rate in basis points (825 = 8.25%).
    #[serde(default)]
    pub tax_rate_bps: u32,

    /// Whether product is active (soft delete).
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// Creates an active product with no SKU, barcode or tax.
    pub fn new(name: impl Into<String>, price_cents: i64) -> Self {
        Product {
            name: name.into(),
            sku: None,
            barcode: None,
            price_cents,
            tax_rate_bps: 0,
            is_active: true,
        }
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A customer record captured at the till or downloaded from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Customer {
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub loyalty_points: i64,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Customer {
            name: name.into(),
            email: None,
            phone: None,
            loyalty_points: 0,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Payment method recorded at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    /// Card payment processed by an external terminal.
    ExternalCard,
    Mixed,
}

/// One immutable line of a completed sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionLine {
    /// Local id of the product sold.
    pub product_local_id: String,

    pub quantity: i64,

    /// Price at time of sale (snapshot, not a live reference).
    pub unit_price_cents: i64,
}

impl TransactionLine {
    pub fn line_total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

/// A completed sale handed to the engine for upload.
///
/// Created once by the checkout flow; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Transaction {
    /// Human-readable receipt number.
    pub receipt_number: String,

    /// Local id of the customer, if one was attached at checkout.
    #[serde(default)]
    pub customer_local_id: Option<String>,

    pub lines: Vec<TransactionLine>,

    pub total_cents: i64,

    #[serde(default)]
    pub payment_method: PaymentMethod,

    /// When checkout completed.
    #[ts(as = "String")]
    pub completed_at: DateTime<Utc>,
}

impl Transaction {
    /// Returns every (entity type, local id) this transaction points at.
    ///
    /// Duplicates are removed; order follows first appearance.
    pub fn references(&self) -> Vec<(EntityType, &str)> {
        let mut refs: Vec<(EntityType, &str)> = Vec::new();

        for line in &self.lines {
            let r = (EntityType::Product, line.product_local_id.as_str());
            if !refs.contains(&r) {
                refs.push(r);
            }
        }

        if let Some(ref customer) = self.customer_local_id {
            refs.push((EntityType::Customer, customer.as_str()));
        }

        refs
    }

    /// Sum of the line totals, for consistency checks by callers.
    pub fn lines_total_cents(&self) -> i64 {
        self.lines.iter().map(TransactionLine::line_total_cents).sum()
    }
}

// =============================================================================
// Entity (tagged union)
// =============================================================================

/// Domain payload of any synchronized record.
///
/// Serialized adjacently tagged:
/// `{ "entity_type": "product", "data": { "name": "Widget", ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "data", rename_all = "snake_case")]
pub enum Entity {
    Product(Product),
    Customer(Customer),
    Transaction(Transaction),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Product(_) => EntityType::Product,
            Entity::Customer(_) => EntityType::Customer,
            Entity::Transaction(_) => EntityType::Transaction,
        }
    }

    /// Serializes the inner entity as a JSON object (field name → value).
    pub fn to_fields(&self) -> CoreResult<Map<String, Value>> {
        let value = match self {
            Entity::Product(p) => serde_json::to_value(p),
            Entity::Customer(c) => serde_json::to_value(c),
            Entity::Transaction(t) => serde_json::to_value(t),
        }
        .map_err(|e| CoreError::invalid_payload(self.entity_type().as_str(), e.to_string()))?;

        match value {
            Value::Object(map) => Ok(map),
            other => Err(CoreError::invalid_payload(
                self.entity_type().as_str(),
                format!("expected object, got {}", other),
            )),
        }
    }

    /// Decodes the inner entity of the given type from a JSON value.
    pub fn from_value(entity_type: EntityType, value: Value) -> CoreResult<Self> {
        let invalid = |e: serde_json::Error| CoreError::invalid_payload(entity_type.as_str(), e.to_string());

        Ok(match entity_type {
            EntityType::Product => Entity::Product(serde_json::from_value(value).map_err(invalid)?),
            EntityType::Customer => {
                Entity::Customer(serde_json::from_value(value).map_err(invalid)?)
            }
            EntityType::Transaction => {
                Entity::Transaction(serde_json::from_value(value).map_err(invalid)?)
            }
        })
    }

    /// Decodes the inner entity from its stored JSON text.
    pub fn from_json(entity_type: EntityType, json: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CoreError::invalid_payload(entity_type.as_str(), e.to_string()))?;
        Self::from_value(entity_type, value)
    }

    /// Serializes the inner entity to JSON text for storage.
    pub fn to_json(&self) -> CoreResult<String> {
        let fields = self.to_fields()?;
        serde_json::to_string(&fields)
            .map_err(|e| CoreError::invalid_payload(self.entity_type().as_str(), e.to_string()))
    }

    /// Fails unless this entity is of the expected type.
    pub fn expect_type(&self, expected: EntityType) -> CoreResult<()> {
        let actual = self.entity_type();
        if actual == expected {
            Ok(())
        } else {
            Err(CoreError::EntityMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            receipt_number: "R-0001".into(),
            customer_local_id: Some("C-local".into()),
            lines: vec![
                TransactionLine {
                    product_local_id: "P1".into(),
                    quantity: 2,
                    unit_price_cents: 999,
                },
                TransactionLine {
                    product_local_id: "P1".into(),
                    quantity: 1,
                    unit_price_cents: 999,
                },
                TransactionLine {
                    product_local_id: "P2".into(),
                    quantity: 1,
                    unit_price_cents: 250,
                },
            ],
            total_cents: 3247,
            payment_method: PaymentMethod::Cash,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!("product".parse::<EntityType>().unwrap(), EntityType::Product);
        assert_eq!("Customers".parse::<EntityType>().unwrap(), EntityType::Customer);
        assert_eq!("sale".parse::<EntityType>().unwrap(), EntityType::Transaction);
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_sync_order() {
        assert_eq!(
            EntityType::SYNC_ORDER,
            [EntityType::Product, EntityType::Customer, EntityType::Transaction]
        );
        assert!(EntityType::Transaction.is_immutable());
        assert!(!EntityType::Product.is_immutable());
    }

    #[test]
    fn test_transaction_references_are_deduplicated() {
        let txn = sample_transaction();
        assert_eq!(
            txn.references(),
            vec![
                (EntityType::Product, "P1"),
                (EntityType::Product, "P2"),
                (EntityType::Customer, "C-local"),
            ]
        );
        assert_eq!(txn.lines_total_cents(), 3247);
    }

    #[test]
    fn test_entity_fields_and_decode() {
        let entity = Entity::Product(Product::new("Widget", 999));
        let fields = entity.to_fields().unwrap();
        assert_eq!(fields["name"], "Widget");
        assert_eq!(fields["price_cents"], 999);

        let decoded = Entity::from_value(EntityType::Product, Value::Object(fields)).unwrap();
        assert_eq!(decoded, entity);
    }

    #[test]
    fn test_entity_decode_rejects_wrong_shape() {
        let err = Entity::from_json(EntityType::Customer, r#"{"price_cents": 5}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { .. }));
    }

    #[test]
    fn test_expect_type() {
        let entity = Entity::Customer(Customer::new("Jane"));
        assert!(entity.expect_type(EntityType::Customer).is_ok());
        assert!(entity.expect_type(EntityType::Product).is_err());
    }

    #[test]
    fn test_tagged_serialization() {
        let entity = Entity::Customer(Customer::new("Jane"));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["entity_type"], "customer");
        assert_eq!(json["data"]["name"], "Jane");
    }
}
