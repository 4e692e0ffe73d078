use super::Endpoint;
use declarative::{AttributeSchema, ResourceSchema, ValueType};

pub(super) const ENDPOINT: Endpoint = Endpoint {
    kind: "monitor",
    path: "/api/v1/monitor",
    envelope: None,
    list_key: None,
    id_field: "id",
    paginated: true,
    numeric_ids: &[],
    full_update: false,
};

fn thresholds() -> ValueType {
    ValueType::block([
        ("critical", ValueType::Number),
        ("critical_recovery", ValueType::Number),
        ("warning", ValueType::Number),
        ("warning_recovery", ValueType::Number),
        ("ok", ValueType::Number),
        ("unknown", ValueType::Number),
    ])
}

fn options() -> ValueType {
    ValueType::block([
        ("thresholds", thresholds()),
        ("notify_no_data", ValueType::Bool),
        ("no_data_timeframe", ValueType::Number),
        ("notify_audit", ValueType::Bool),
        ("renotify_interval", ValueType::Number),
        ("escalation_message", ValueType::String),
        ("timeout_h", ValueType::Number),
        ("include_tags", ValueType::Bool),
        ("require_full_window", ValueType::Bool),
        ("evaluation_delay", ValueType::Number),
        ("new_group_delay", ValueType::Number),
    ])
}

pub(super) fn schema() -> ResourceSchema {
    ResourceSchema::new("monitor")
        .description("Alert on a metric, log, APM or composite query")
        .attribute(AttributeSchema::required("name", ValueType::String))
        // The monitor type cannot be changed after creation
        .attribute(AttributeSchema::required("type", ValueType::String).force_new())
        .attribute(AttributeSchema::required("query", ValueType::String))
        .attribute(AttributeSchema::required("message", ValueType::String))
        .attribute(AttributeSchema::optional("tags", ValueType::set(ValueType::String)))
        .attribute(AttributeSchema::optional("priority", ValueType::Number))
        .attribute(AttributeSchema::optional(
            "restricted_roles",
            ValueType::set(ValueType::String),
        ))
        .attribute(AttributeSchema::optional("options", options()))
        .attribute(AttributeSchema::computed("overall_state", ValueType::String))
        .attribute(AttributeSchema::computed("created", ValueType::String))
        .attribute(AttributeSchema::computed("modified", ValueType::String))
        .attribute(AttributeSchema::computed(
            "creator",
            ValueType::block([
                ("email", ValueType::String),
                ("handle", ValueType::String),
                ("name", ValueType::String),
            ]),
        ))
}
