use super::Endpoint;
use declarative::{AttributeSchema, ResourceSchema, ValueType};

pub(super) const ENDPOINT: Endpoint = Endpoint {
    kind: "downtime",
    path: "/api/v1/downtime",
    envelope: None,
    list_key: None,
    id_field: "id",
    paginated: false,
    numeric_ids: &["monitor_id"],
    full_update: false,
};

pub(super) fn schema() -> ResourceSchema {
    ResourceSchema::new("downtime")
        .description("Silence monitors matching a scope for a period of time")
        .attribute(AttributeSchema::required("scope", ValueType::set(ValueType::String)))
        // Referenced as `${monitor.<name>.id}`; sent to the API as an integer
        .attribute(AttributeSchema::optional("monitor_id", ValueType::String))
        .attribute(AttributeSchema::optional(
            "monitor_tags",
            ValueType::set(ValueType::String),
        ))
        .attribute(AttributeSchema::optional("start", ValueType::Number))
        .attribute(AttributeSchema::optional("end", ValueType::Number))
        .attribute(AttributeSchema::optional("timezone", ValueType::String).reset_to_default("UTC"))
        .attribute(AttributeSchema::optional("message", ValueType::String))
        .attribute(AttributeSchema::optional(
            "recurrence",
            ValueType::block([
                ("type", ValueType::String),
                ("period", ValueType::Number),
                ("week_days", ValueType::list(ValueType::String)),
                ("until_date", ValueType::Number),
                ("until_occurrences", ValueType::Number),
            ]),
        ))
        .attribute(AttributeSchema::computed("active", ValueType::Bool))
        .attribute(AttributeSchema::computed("disabled", ValueType::Bool))
}
