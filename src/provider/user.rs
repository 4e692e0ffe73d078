use super::Endpoint;
use declarative::{AttributeSchema, ResourceSchema, ValueType};

pub(super) const ENDPOINT: Endpoint = Endpoint {
    kind: "user",
    path: "/api/v1/user",
    envelope: Some("user"),
    list_key: Some("users"),
    id_field: "handle",
    paginated: false,
    numeric_ids: &[],
    full_update: false,
};

pub(super) fn schema() -> ResourceSchema {
    ResourceSchema::new("user")
        .description("An organization member, identified by handle")
        .attribute(AttributeSchema::required("handle", ValueType::String).force_new())
        .attribute(AttributeSchema::required("email", ValueType::String).sensitive())
        .attribute(AttributeSchema::optional("name", ValueType::String))
        .attribute(AttributeSchema::optional("access_role", ValueType::String).reset_to_default("st"))
        .attribute(AttributeSchema::optional("disabled", ValueType::Bool).reset_to_default(false))
        .attribute(AttributeSchema::computed("verified", ValueType::Bool))
        .attribute(AttributeSchema::computed("is_admin", ValueType::Bool))
}
