//! Schema registry
//!
//! Each resource kind declares its attributes once at startup. The registry
//! is built, then frozen: lookups take `&self` so it can be shared across
//! worker threads without locking.

use crate::error::{Error, Result};
use crate::types::{DesiredConfig, PlannedValue, Reference, ResourceAddress};
use crate::value::{Coercion, Value, ValueType};
use std::collections::BTreeMap;

/// Name of the identity attribute every kind carries.
pub const ID_ATTRIBUTE: &str = "id";

/// Who supplies an attribute's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be present in desired config
    Required,
    /// May be present in desired config
    Optional,
    /// Only ever set by the remote API
    Computed,
}

/// What an attribute omitted from desired config means
#[derive(Debug, Clone, PartialEq)]
pub enum OnOmit {
    /// Leave whatever the remote object holds untouched
    Ignore,
    /// Converge the remote value back to this default
    ResetToDefault(Value),
}

/// Declaration of a single attribute
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub value_type: ValueType,
    pub presence: Presence,
    /// A change cannot be applied in place and requires delete + create
    pub force_new: bool,
    /// Redacted from plan output
    pub sensitive: bool,
    pub on_omit: OnOmit,
}

impl AttributeSchema {
    fn new(name: impl Into<String>, value_type: ValueType, presence: Presence) -> Self {
        Self {
            name: name.into(),
            value_type,
            presence,
            force_new: false,
            sensitive: false,
            on_omit: OnOmit::Ignore,
        }
    }

    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, value_type, Presence::Required)
    }

    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, value_type, Presence::Optional)
    }

    pub fn computed(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, value_type, Presence::Computed)
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Treat omission as "reset to this value" instead of "leave untouched".
    pub fn reset_to_default(mut self, default: impl Into<Value>) -> Self {
        self.on_omit = OnOmit::ResetToDefault(default.into());
        self
    }

    pub fn is_computed(&self) -> bool {
        self.presence == Presence::Computed
    }
}

/// Attribute set for one resource kind
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub kind: String,
    pub description: String,
    attributes: Vec<AttributeSchema>,
}

impl ResourceSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: String::new(),
            attributes: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Check raw desired attributes against this schema.
    ///
    /// Rejects unknown attributes, user-supplied computed attributes,
    /// missing required attributes and type mismatches. String values of
    /// the form `${kind.name.attribute}` become references.
    pub fn validate(&self, desired: &DesiredConfig) -> Result<BTreeMap<String, PlannedValue>> {
        let address = &desired.address;
        let mut validated = BTreeMap::new();

        for (name, raw) in &desired.attributes {
            let attr = self
                .get(name)
                .ok_or_else(|| Error::validation(address, format!("unknown attribute '{name}'")))?;

            if attr.is_computed() {
                return Err(Error::validation(
                    address,
                    format!("attribute '{name}' is computed and cannot be set"),
                ));
            }

            if let Some(reference) = raw.as_str().and_then(Reference::parse) {
                validated.insert(name.clone(), PlannedValue::Pending(reference));
                continue;
            }

            let value = Value::coerce(raw, &attr.value_type, Coercion::Strict)
                .map_err(|e| Error::validation(address, format!("attribute '{name}': {e}")))?
                .ok_or_else(|| Error::validation(address, format!("attribute '{name}' is null")))?;
            validated.insert(name.clone(), PlannedValue::Known(value));
        }

        for attr in &self.attributes {
            if attr.presence == Presence::Required && !validated.contains_key(&attr.name) {
                return Err(Error::validation(
                    address,
                    format!("missing required attribute '{}'", attr.name),
                ));
            }
        }

        Ok(validated)
    }

    /// Pick the declared attributes out of a remote object.
    ///
    /// Undeclared fields and nulls are dropped; the identity is always
    /// recorded under [`ID_ATTRIBUTE`].
    pub fn decode_remote(
        &self,
        id: &str,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<BTreeMap<String, Value>, String> {
        let mut attributes = BTreeMap::new();
        for attr in &self.attributes {
            if attr.name == ID_ATTRIBUTE {
                continue;
            }
            let Some(raw_value) = raw.get(&attr.name) else {
                continue;
            };
            if let Some(value) = Value::coerce(raw_value, &attr.value_type, Coercion::Lenient)
                .map_err(|e| format!("{}.{}: {e}", self.kind, attr.name))?
            {
                attributes.insert(attr.name.clone(), value);
            }
        }
        attributes.insert(ID_ATTRIBUTE.to_string(), Value::String(id.to_string()));
        Ok(attributes)
    }

    fn check(&mut self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for attr in &self.attributes {
            if !seen.insert(attr.name.as_str()) {
                return Err(Error::schema(
                    &self.kind,
                    format!("duplicate attribute '{}'", attr.name),
                ));
            }
            if let OnOmit::ResetToDefault(default) = &attr.on_omit {
                if attr.is_computed() {
                    return Err(Error::schema(
                        &self.kind,
                        format!("computed attribute '{}' cannot have a default", attr.name),
                    ));
                }
                if !default.conforms_to(&attr.value_type) {
                    return Err(Error::schema(
                        &self.kind,
                        format!(
                            "default for '{}' is not a {}",
                            attr.name, attr.value_type
                        ),
                    ));
                }
            }
        }

        match self.get(ID_ATTRIBUTE) {
            None => self.attributes.insert(
                0,
                AttributeSchema::computed(ID_ATTRIBUTE, ValueType::String),
            ),
            Some(id) if id.is_computed() && id.value_type == ValueType::String => {}
            Some(_) => {
                return Err(Error::schema(
                    &self.kind,
                    "'id' must be a computed string",
                ));
            }
        }

        Ok(())
    }
}

/// Builder for a [`SchemaRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl RegistryBuilder {
    /// Register a resource kind, rejecting malformed or duplicate schemas.
    pub fn register(mut self, mut schema: ResourceSchema) -> Result<Self> {
        if self.schemas.contains_key(&schema.kind) {
            return Err(Error::schema(&schema.kind, "kind registered twice"));
        }
        schema.check()?;
        log::debug!(
            "Registered kind '{}' with {} attributes",
            schema.kind,
            schema.attributes.len()
        );
        self.schemas.insert(schema.kind.clone(), schema);
        Ok(self)
    }

    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry {
            schemas: self.schemas,
        }
    }
}

/// Read-only set of registered resource kinds
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a kind's schema.
    pub fn lookup(&self, kind: &str) -> Result<&ResourceSchema> {
        self.schemas
            .get(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.schemas.values()
    }

    /// Schema for the resource at `address`
    pub fn for_address(&self, address: &ResourceAddress) -> Result<&ResourceSchema> {
        self.lookup(&address.kind)
    }
}
