use super::Endpoint;
use declarative::{AttributeSchema, ResourceSchema, ValueType};

pub(super) const ENDPOINT: Endpoint = Endpoint {
    kind: "dashboard",
    path: "/api/v1/dashboard",
    envelope: None,
    list_key: Some("dashboards"),
    id_field: "id",
    paginated: false,
    numeric_ids: &[],
    full_update: true,
};

fn request() -> ValueType {
    ValueType::block([
        ("q", ValueType::String),
        ("display_type", ValueType::String),
        ("aggregator", ValueType::String),
    ])
}

fn widget() -> ValueType {
    ValueType::block([
        (
            "definition",
            ValueType::block([
                ("type", ValueType::String),
                ("title", ValueType::String),
                ("title_size", ValueType::String),
                ("title_align", ValueType::String),
                ("show_legend", ValueType::Bool),
                ("content", ValueType::String),
                ("background_color", ValueType::String),
                ("font_size", ValueType::String),
                ("alert_id", ValueType::String),
                ("requests", ValueType::list(request())),
            ]),
        ),
        (
            "layout",
            ValueType::block([
                ("x", ValueType::Number),
                ("y", ValueType::Number),
                ("width", ValueType::Number),
                ("height", ValueType::Number),
            ]),
        ),
    ])
}

pub(super) fn schema() -> ResourceSchema {
    ResourceSchema::new("dashboard")
        .description("A timeboard (ordered) or screenboard (free) dashboard")
        .attribute(AttributeSchema::required("title", ValueType::String))
        .attribute(AttributeSchema::required("layout_type", ValueType::String).force_new())
        .attribute(AttributeSchema::optional("description", ValueType::String))
        .attribute(AttributeSchema::optional("widgets", ValueType::list(widget())))
        .attribute(AttributeSchema::optional("is_read_only", ValueType::Bool).reset_to_default(false))
        .attribute(AttributeSchema::optional(
            "notify_list",
            ValueType::set(ValueType::String),
        ))
        .attribute(AttributeSchema::optional(
            "template_variables",
            ValueType::list(ValueType::block([
                ("name", ValueType::String),
                ("prefix", ValueType::String),
                ("default", ValueType::String),
            ])),
        ))
        .attribute(AttributeSchema::computed("url", ValueType::String))
        .attribute(AttributeSchema::computed("author_handle", ValueType::String))
}
