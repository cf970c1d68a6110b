//! Exchange types and the exchange factory.
//!
//! The registry maps a type name (`direct`, `fanout`, ...) to the
//! [`ExchangeType`] that builds exchanges of that type. Registration is
//! strict: a type name may only be registered once, and the four base types
//! must always be present. Both failures stop the broker from starting.

use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute naming the exchange type.
pub const TYPE_ATTRIBUTE: &str = "type";
/// Attribute naming the exchange.
pub const NAME_ATTRIBUTE: &str = "name";
/// Attribute marking the exchange as durable.
pub const DURABLE_ATTRIBUTE: &str = "durable";

/// Type names that every registry must provide.
pub const BASE_EXCHANGE_TYPES: [&str; 4] = ["direct", "fanout", "headers", "topic"];

/// The four standard exchange kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Headers,
    Topic,
}

impl ExchangeKind {
    pub const ALL: [ExchangeKind; 4] = [
        ExchangeKind::Direct,
        ExchangeKind::Fanout,
        ExchangeKind::Headers,
        ExchangeKind::Topic,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// An exchange created from its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub name: String,
    pub exchange_type: String,
    pub durable: bool,
    /// The full attribute map the exchange was created from.
    pub attributes: Map<String, Value>,
}

/// Builds exchanges of one type.
pub trait ExchangeType: Send + Sync {
    /// The type name matched against the `type` attribute.
    fn type_name(&self) -> &str;

    /// Identifies this implementation in registration errors.
    fn implementation(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn new_instance(&self, attributes: &Map<String, Value>) -> Result<Exchange, ExchangeError>;
}

/// Exchange type for the standard kinds.
#[derive(Debug, Clone, Copy)]
pub struct StandardExchangeType(pub ExchangeKind);

impl ExchangeType for StandardExchangeType {
    fn type_name(&self) -> &str {
        self.0.type_name()
    }

    fn new_instance(&self, attributes: &Map<String, Value>) -> Result<Exchange, ExchangeError> {
        let name = string_attribute(attributes, NAME_ATTRIBUTE)?;
        if name.is_empty() {
            return Err(ExchangeError::InvalidAttribute {
                name: NAME_ATTRIBUTE,
                reason: "must not be empty".to_string(),
            });
        }
        let durable = match attributes.get(DURABLE_ATTRIBUTE) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(ExchangeError::InvalidAttribute {
                    name: DURABLE_ATTRIBUTE,
                    reason: format!("expected a boolean, got {}", other),
                })
            }
        };

        Ok(Exchange {
            name: name.to_string(),
            exchange_type: self.0.type_name().to_string(),
            durable,
            attributes: attributes.clone(),
        })
    }
}

fn string_attribute<'a>(
    attributes: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, ExchangeError> {
    match attributes.get(name) {
        None | Some(Value::Null) => Err(ExchangeError::MissingAttribute(name)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ExchangeError::InvalidAttribute {
            name,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

/// Registry of exchange types, also acting as the exchange factory.
#[derive(Default)]
pub struct ExchangeRegistry {
    types: BTreeMap<String, Arc<dyn ExchangeType>>,
}

impl ExchangeRegistry {
    /// Creates an empty registry. Call [`ExchangeRegistry::verify`] once
    /// registration is done.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the four standard types.
    pub fn with_defaults() -> Result<Self, ExchangeError> {
        Self::from_types(
            ExchangeKind::ALL
                .into_iter()
                .map(|kind| Arc::new(StandardExchangeType(kind)) as Arc<dyn ExchangeType>),
        )
    }

    /// Registers every type in order and then verifies the base types.
    pub fn from_types(
        types: impl IntoIterator<Item = Arc<dyn ExchangeType>>,
    ) -> Result<Self, ExchangeError> {
        let mut registry = Self::new();
        for exchange_type in types {
            registry.register(exchange_type)?;
        }
        registry.verify()?;
        Ok(registry)
    }

    pub fn register(&mut self, exchange_type: Arc<dyn ExchangeType>) -> Result<(), ExchangeError> {
        let name = exchange_type.type_name().to_string();
        tracing::debug!(
            "Registering exchange type '{}' using '{}'",
            name,
            exchange_type.implementation()
        );

        if let Some(existing) = self.types.get(&name) {
            return Err(ExchangeError::DuplicateType {
                name,
                existing: existing.implementation().to_string(),
                rejected: exchange_type.implementation().to_string(),
            });
        }
        self.types.insert(name, exchange_type);
        Ok(())
    }

    /// Checks that every base exchange type is registered.
    pub fn verify(&self) -> Result<(), ExchangeError> {
        for base in BASE_EXCHANGE_TYPES {
            if !self.types.contains_key(base) {
                return Err(ExchangeError::MissingBaseType(base.to_string()));
            }
        }
        Ok(())
    }

    /// Registered type names in sorted order.
    pub fn registered_types(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn ExchangeType>> {
        self.types.get(type_name)
    }

    /// Creates an exchange from attributes. The `type` attribute selects
    /// the exchange type.
    pub fn create_exchange(&self, attributes: &Map<String, Value>) -> Result<Exchange, ExchangeError> {
        let type_name = string_attribute(attributes, TYPE_ATTRIBUTE)?;
        let exchange_type = self
            .types
            .get(type_name)
            .ok_or_else(|| ExchangeError::UnknownExchangeType(type_name.to_string()))?;
        exchange_type.new_instance(attributes)
    }

    /// Recreates a previously persisted exchange.
    pub fn restore_exchange(&self, attributes: &Map<String, Value>) -> Result<Exchange, ExchangeError> {
        self.create_exchange(attributes)
    }
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}
