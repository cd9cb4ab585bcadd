//! Descriptor validation.
//!
//! Turns a raw, untrusted payload into a typed [`SearchRequest`]. The filter
//! tree depth is checked first and aborts on its own; every other failure is
//! collected into one [`ValidationReport`] keyed by payload path.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::descriptor::{
    Boolean, FilterLeaf, FilterNode, PageRequest, ScopeDescriptor, SearchDescriptor,
    SearchRequest, SortDescriptor, SortDirection, parse_timestamp,
};
use crate::directive::{AllowedFilter, Operator, Registries, ValueRule};
use crate::error::{FieldErrorKind, SearchError, ValidationReport};

/// Validates payloads against one resource's registries.
pub struct DescriptorValidator<'a> {
    registries: &'a Registries,
    config: &'a SearchConfig,
}

impl<'a> DescriptorValidator<'a> {
    pub fn new(registries: &'a Registries, config: &'a SearchConfig) -> Self {
        Self { registries, config }
    }

    /// Validate a payload.
    ///
    /// Unknown top-level keys are ignored. A `null` payload is an empty request.
    pub fn validate(&self, payload: &Value) -> Result<SearchRequest, SearchError> {
        let max = self.config.max_nested_depth;
        if let Some(filters) = payload.get("filters")
            && exceeds_depth(filters, max)
        {
            warn!(max, "filter tree exceeds max nested depth");
            return Err(SearchError::MaxDepthExceeded { max });
        }

        let mut report = ValidationReport::default();
        let empty = Map::new();
        let input = match payload {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                report.push(
                    "payload",
                    FieldErrorKind::InvalidValue,
                    "The search payload must be an object.",
                );
                &empty
            }
        };

        let request = SearchRequest {
            scopes: self.scopes(input.get("scopes"), &mut report),
            filters: input
                .get("filters")
                .map(|filters| self.filter_nodes(filters, "filters", &mut report))
                .unwrap_or_default(),
            search: self.search(input.get("search"), &mut report),
            sort: self.sort(input.get("sort"), &mut report),
            page: self.page(input, &mut report),
            include: include(input.get("include"), &mut report),
        };

        if !report.is_empty() {
            debug!(errors = report.len(), "search payload rejected");
        }
        report.into_result(request)
    }

    fn scopes(&self, raw: Option<&Value>, report: &mut ValidationReport) -> Vec<ScopeDescriptor> {
        let Some(items) = array_at(raw, "scopes", report) else {
            return Vec::new();
        };

        let mut scopes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let path = format!("scopes.{index}");
            let Some(object) = object_at(item, &path, report) else {
                continue;
            };

            let name_path = format!("{path}.name");
            let Some(name) = required_string(object.get("name"), &name_path, "scopes", report)
            else {
                continue;
            };
            if !self.registries.scopes.contains(name) {
                report.push(
                    &name_path,
                    FieldErrorKind::UnknownField,
                    format!("The selected {name_path} is invalid."),
                );
                continue;
            }

            let parameters = match object.get("parameters") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(parameters)) => parameters.clone(),
                Some(_) => {
                    report.push(
                        format!("{path}.parameters"),
                        FieldErrorKind::InvalidValue,
                        format!("The {path}.parameters must be an array."),
                    );
                    continue;
                }
            };

            scopes.push(ScopeDescriptor::new(name).with_parameters(parameters));
        }
        scopes
    }

    /// Validate a list of filter nodes under `prefix` (`filters`,
    /// `filters.0.nested`, ...). Depth was bounded before the first call.
    fn filter_nodes(
        &self,
        raw: &Value,
        prefix: &str,
        report: &mut ValidationReport,
    ) -> Vec<FilterNode> {
        let Some(items) = array_at(Some(raw), prefix, report) else {
            return Vec::new();
        };

        let mut nodes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let path = format!("{prefix}.{index}");
            let Some(object) = object_at(item, &path, report) else {
                continue;
            };

            let boolean = match object.get("type") {
                None | Some(Value::Null) => Boolean::And,
                Some(raw) => match raw.as_str().and_then(Boolean::parse) {
                    Some(boolean) => boolean,
                    None => {
                        report.push(
                            format!("{path}.type"),
                            FieldErrorKind::InvalidValue,
                            format!("The selected {path}.type is invalid."),
                        );
                        Boolean::And
                    }
                },
            };

            if let Some(nested) = object.get("nested") {
                let nested = self.filter_nodes(nested, &format!("{path}.nested"), report);
                nodes.push(FilterNode::group(boolean, nested));
            } else if let Some(mut leaf) = self.leaf(object, &path, report) {
                leaf.boolean = boolean;
                nodes.push(FilterNode::Leaf(leaf));
            }
        }
        nodes
    }

    fn leaf(
        &self,
        object: &Map<String, Value>,
        path: &str,
        report: &mut ValidationReport,
    ) -> Option<FilterLeaf> {
        let field_path = format!("{path}.field");
        let Some(field) = object.get("field").and_then(Value::as_str) else {
            report.push(
                &field_path,
                FieldErrorKind::Required,
                format!("The {field_path} field is required when {path}.nested is not present."),
            );
            return None;
        };

        let Some(filter) = self.registries.filters.get(field) else {
            report.push(
                &field_path,
                FieldErrorKind::UnknownField,
                format!("The selected {field_path} is invalid."),
            );
            return None;
        };

        let operator = match object.get("operator") {
            None | Some(Value::Null) => Operator::Eq,
            Some(raw) => {
                let operator = raw.as_str().and_then(|raw| raw.parse::<Operator>().ok());
                match operator {
                    Some(operator) if filter.allows(operator) => operator,
                    _ => {
                        let operator_path = format!("{path}.operator");
                        report.push(
                            &operator_path,
                            FieldErrorKind::OperatorNotAllowed,
                            format!("The selected {operator_path} is invalid."),
                        );
                        return None;
                    }
                }
            }
        };

        let value = object.get("value");
        if !check_value(filter, operator, value, &format!("{path}.value"), report) {
            return None;
        }

        Some(FilterLeaf::new(field, operator, value.map_or(Value::Null, blank_to_null)))
    }

    fn search(&self, raw: Option<&Value>, report: &mut ValidationReport) -> Option<SearchDescriptor> {
        let object = match raw? {
            Value::Null => return None,
            Value::Object(object) => object,
            _ => {
                report.push(
                    "search",
                    FieldErrorKind::InvalidValue,
                    "The search must be an object.",
                );
                return None;
            }
        };

        let value = match object.get("value") {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => {
                report.push(
                    "search.value",
                    FieldErrorKind::InvalidValue,
                    "The search.value must be a string.",
                );
                None
            }
        };

        let case_sensitive = match object.get("case_sensitive") {
            None => None,
            Some(raw) => {
                let flag = as_boolean(raw);
                if flag.is_none() {
                    report.push(
                        "search.case_sensitive",
                        FieldErrorKind::InvalidValue,
                        "The search.case_sensitive field must be true or false.",
                    );
                }
                flag
            }
        };

        Some(SearchDescriptor {
            value,
            case_sensitive,
        })
    }

    fn sort(&self, raw: Option<&Value>, report: &mut ValidationReport) -> Vec<SortDescriptor> {
        let Some(items) = array_at(raw, "sort", report) else {
            return Vec::new();
        };

        let mut sorts = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let path = format!("sort.{index}");
            let Some(object) = object_at(item, &path, report) else {
                continue;
            };

            let field_path = format!("{path}.field");
            let Some(field) = required_string(object.get("field"), &field_path, "sort", report)
            else {
                continue;
            };
            if !self.registries.sorts.contains(field) {
                report.push(
                    &field_path,
                    FieldErrorKind::UnknownField,
                    format!("The selected {field_path} is invalid."),
                );
                continue;
            }

            let direction = match object.get("direction").map(Value::as_str) {
                None => SortDirection::Asc,
                Some(Some("asc")) => SortDirection::Asc,
                Some(Some("desc")) => SortDirection::Desc,
                Some(_) => {
                    let direction_path = format!("{path}.direction");
                    report.push(
                        &direction_path,
                        FieldErrorKind::InvalidValue,
                        format!("The selected {direction_path} is invalid."),
                    );
                    continue;
                }
            };

            sorts.push(SortDescriptor {
                field: field.to_string(),
                direction,
            });
        }
        sorts
    }

    fn page(&self, input: &Map<String, Value>, report: &mut ValidationReport) -> PageRequest {
        let names = &self.config.pagination;
        let root = names.pagination_parameter.as_str();

        let object = match input.get(root) {
            None | Some(Value::Null) => return PageRequest::default(),
            Some(Value::Object(object)) => object,
            Some(_) => {
                report.push(
                    root,
                    FieldErrorKind::InvalidValue,
                    format!("The {root} must be an object."),
                );
                return PageRequest::default();
            }
        };

        let present = |key: &str| object.get(key).filter(|value| !value.is_null());

        let size_path = format!("{root}.{}", names.size_parameter);
        let size = present(&names.size_parameter).and_then(|raw| {
            let max = names.max_size;
            match as_integer(raw) {
                Some(size) if size >= 1 && size.unsigned_abs() <= max => Some(size.unsigned_abs()),
                Some(size) if size < 1 => {
                    report.push(
                        &size_path,
                        FieldErrorKind::InvalidValue,
                        format!("The {size_path} must be greater than or equal to 1."),
                    );
                    None
                }
                Some(_) => {
                    report.push(
                        &size_path,
                        FieldErrorKind::InvalidValue,
                        format!("The {size_path} must be less than or equal to {max}."),
                    );
                    None
                }
                None => {
                    report.push(
                        &size_path,
                        FieldErrorKind::InvalidValue,
                        format!("The {size_path} must be an integer."),
                    );
                    None
                }
            }
        });

        let number_path = format!("{root}.{}", names.number_parameter);
        let number = present(&names.number_parameter).and_then(|raw| match as_integer(raw) {
            Some(number) if number >= 1 => Some(number.unsigned_abs()),
            Some(_) => {
                report.push(
                    &number_path,
                    FieldErrorKind::InvalidValue,
                    format!("The {number_path} must be greater than or equal to 1."),
                );
                None
            }
            None => {
                report.push(
                    &number_path,
                    FieldErrorKind::InvalidValue,
                    format!("The {number_path} must be an integer."),
                );
                None
            }
        });

        let cursor_path = format!("{root}.{}", names.cursor_parameter);
        let cursor = present(&names.cursor_parameter).and_then(|raw| {
            if present(&names.number_parameter).is_some() {
                report.push(
                    &cursor_path,
                    FieldErrorKind::InvalidValue,
                    format!("The {cursor_path} field prohibits {number_path} from being present."),
                );
                return None;
            }
            match raw.as_str() {
                Some(cursor) => Some(cursor.to_string()),
                None => {
                    report.push(
                        &cursor_path,
                        FieldErrorKind::InvalidValue,
                        format!("The {cursor_path} must be a string."),
                    );
                    None
                }
            }
        });

        let total_path = format!("{root}.include_total_count");
        let include_total_count = present("include_total_count").and_then(|raw| {
            let flag = as_boolean(raw);
            if flag.is_none() {
                report.push(
                    &total_path,
                    FieldErrorKind::InvalidValue,
                    format!("The {total_path} field must be true or false."),
                );
            }
            flag
        });

        PageRequest {
            size,
            number,
            cursor,
            include_total_count,
        }
    }
}

fn include(raw: Option<&Value>, report: &mut ValidationReport) -> Option<String> {
    match raw? {
        Value::Null => None,
        Value::String(include) => Some(include.clone()),
        _ => {
            report.push(
                "include",
                FieldErrorKind::InvalidValue,
                "The include must be a string.",
            );
            None
        }
    }
}

/// Whether the filter list nests groups deeper than `allowance` levels.
///
/// Stops at the first group past the allowance, so the walk never goes
/// deeper than `allowance + 1` levels whatever the payload holds.
fn exceeds_depth(nodes: &Value, allowance: usize) -> bool {
    let Some(nodes) = nodes.as_array() else {
        return false;
    };

    nodes.iter().any(|node| match node.get("nested") {
        Some(nested) => allowance == 0 || exceeds_depth(nested, allowance - 1),
        None => false,
    })
}

fn array_at<'v>(
    raw: Option<&'v Value>,
    path: &str,
    report: &mut ValidationReport,
) -> Option<&'v Vec<Value>> {
    match raw? {
        Value::Null => None,
        Value::Array(items) => Some(items),
        _ => {
            report.push(
                path,
                FieldErrorKind::InvalidValue,
                format!("The {path} must be an array."),
            );
            None
        }
    }
}

fn object_at<'v>(
    raw: &'v Value,
    path: &str,
    report: &mut ValidationReport,
) -> Option<&'v Map<String, Value>> {
    match raw {
        Value::Object(object) => Some(object),
        _ => {
            report.push(
                path,
                FieldErrorKind::InvalidValue,
                format!("The {path} must be an object."),
            );
            None
        }
    }
}

fn required_string<'v>(
    raw: Option<&'v Value>,
    path: &str,
    parent: &str,
    report: &mut ValidationReport,
) -> Option<&'v str> {
    match raw.and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Some(value),
        _ => {
            report.push(
                path,
                FieldErrorKind::Required,
                format!("The {path} field is required when {parent} is present."),
            );
            None
        }
    }
}

/// Empty strings, also inside arrays, stand for null.
fn blank_to_null(value: &Value) -> Value {
    match value {
        Value::String(raw) if raw.is_empty() => Value::Null,
        Value::Array(items) => Value::Array(items.iter().map(blank_to_null).collect()),
        other => other.clone(),
    }
}

/// Validate a leaf value for the operator in use. Returns whether it passed.
fn check_value(
    filter: &AllowedFilter,
    operator: Operator,
    value: Option<&Value>,
    path: &str,
    report: &mut ValidationReport,
) -> bool {
    let before = report.len();

    if operator.is_membership() {
        match value {
            Some(Value::Array(items)) if !items.is_empty() => {
                check_elements(filter, items, path, report);
            }
            Some(Value::Array(_)) | None | Some(Value::Null) => report.push(
                path,
                FieldErrorKind::Required,
                format!("The {path} field is required."),
            ),
            Some(_) => report.push(
                path,
                FieldErrorKind::InvalidValue,
                format!("The {path} must be an array."),
            ),
        }
        return report.len() == before;
    }

    let missing = matches!(value, None | Some(Value::Null))
        || value.and_then(Value::as_str) == Some("");
    if missing && !matches!(operator, Operator::Eq | Operator::NotEq) {
        report.push(
            path,
            FieldErrorKind::Required,
            format!("The {path} field is required for the '{operator}' operator."),
        );
        return false;
    }

    match value {
        // An absent value is left to the compiler as a null check.
        None => {}
        Some(Value::Array(items)) => {
            let null_or_set = matches!(operator, Operator::Eq | Operator::NotEq)
                && items.iter().any(Value::is_null);
            if null_or_set {
                check_elements(filter, items, path, report);
            } else {
                report.push(
                    path,
                    FieldErrorKind::InvalidValue,
                    format!("The {path} must not be an array for the '{operator}' operator."),
                );
            }
        }
        Some(value) => {
            if let Some(message) = check_scalar(&filter.rules, value, path) {
                report.push(path, FieldErrorKind::InvalidValue, message);
            }
        }
    }

    report.len() == before
}

fn check_elements(
    filter: &AllowedFilter,
    items: &[Value],
    path: &str,
    report: &mut ValidationReport,
) {
    for (index, item) in items.iter().enumerate() {
        let item_path = format!("{path}.{index}");
        if item.is_array() || item.is_object() {
            report.push(
                &item_path,
                FieldErrorKind::InvalidValue,
                format!("The {item_path} must be a scalar."),
            );
        } else if let Some(message) = check_scalar(&filter.rules, item, &item_path) {
            report.push(&item_path, FieldErrorKind::InvalidValue, message);
        }
    }
}

/// Check a scalar against every rule. Empty strings count as absent and pass.
fn check_scalar(rules: &[ValueRule], value: &Value, path: &str) -> Option<String> {
    if value.as_str() == Some("") {
        return None;
    }
    if value.is_null() {
        return (!rules.contains(&ValueRule::Nullable))
            .then(|| format!("The {path} field must not be null."));
    }
    if value.is_array() || value.is_object() {
        return Some(format!("The {path} must be a scalar."));
    }

    rules.iter().find_map(|rule| match rule {
        ValueRule::String => {
            (!value.is_string()).then(|| format!("The {path} must be a string."))
        }
        ValueRule::Integer => {
            as_integer(value)
                .is_none()
                .then(|| format!("The {path} must be an integer."))
        }
        ValueRule::Numeric => {
            as_number(value)
                .is_none()
                .then(|| format!("The {path} must be a number."))
        }
        ValueRule::Date => value
            .as_str()
            .and_then(parse_timestamp)
            .is_none()
            .then(|| format!("The {path} is not a valid date.")),
        ValueRule::Boolean => {
            as_boolean(value)
                .is_none()
                .then(|| format!("The {path} field must be true or false."))
        }
        ValueRule::Uuid => value
            .as_str()
            .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
            .is_none()
            .then(|| format!("The {path} must be a valid UUID.")),
        ValueRule::Nullable => None,
    })
}

/// Integers, as JSON numbers or decimal strings.
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Booleans in the forms query strings and JSON clients send.
pub(crate) fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(raw) => match raw.as_str() {
            "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directive::{AllowedScope, AllowedSort, Directive};
    use serde_json::json;

    fn registries() -> Registries {
        Registries::new(
            vec![
                Directive::from(AllowedFilter::string("title")),
                AllowedFilter::number("votes").into(),
                AllowedFilter::timestamp("publish_at").into(),
                AllowedFilter::string("user_name").internal("user.name").into(),
            ],
            vec![AllowedSort::field("title").into()],
            vec![AllowedScope::name("published").into()],
        )
        .unwrap()
    }

    fn validate(payload: Value) -> Result<SearchRequest, SearchError> {
        let registries = registries();
        let config = SearchConfig::default();
        DescriptorValidator::new(&registries, &config).validate(&payload)
    }

    fn rejected(payload: Value) -> ValidationReport {
        match validate(payload) {
            Err(SearchError::Validation(report)) => report,
            other => panic!("expected a validation report, got {other:?}"),
        }
    }

    fn nest(depth: usize) -> Value {
        let mut node = json!({"field": "title", "value": "a"});
        for _ in 0..depth {
            node = json!({"type": "and", "nested": [node]});
        }
        json!([node])
    }

    #[test]
    fn empty_payload_is_valid() {
        let request = validate(Value::Null).unwrap();
        assert!(request.filters.is_empty());
        assert_eq!(request.page, PageRequest::default());
    }

    #[test]
    fn depth_at_max_is_valid() {
        let registries = registries();
        let config = SearchConfig {
            max_nested_depth: 3,
            ..SearchConfig::default()
        };
        let validator = DescriptorValidator::new(&registries, &config);

        let request = validator.validate(&json!({"filters": nest(3)})).unwrap();
        assert_eq!(request.filter_depth(), 3);

        let err = validator.validate(&json!({"filters": nest(4)})).unwrap_err();
        assert!(matches!(err, SearchError::MaxDepthExceeded { max: 3 }));
    }

    #[test]
    fn depth_check_runs_before_field_checks() {
        let registries = registries();
        let config = SearchConfig {
            max_nested_depth: 1,
            ..SearchConfig::default()
        };
        let payload = json!({
            "filters": [{"nested": [{"nested": [{"field": "nope"}]}]}],
            "sort": [{"field": "nope"}],
        });
        let err = DescriptorValidator::new(&registries, &config)
            .validate(&payload)
            .unwrap_err();
        assert!(matches!(err, SearchError::MaxDepthExceeded { .. }));
    }

    #[test]
    fn unknown_field_is_keyed_by_position() {
        let report = rejected(json!({
            "filters": [
                {"field": "title", "value": "a"},
                {"type": "or", "nested": [{"field": "secret", "value": 1}]},
            ]
        }));
        assert_eq!(report.len(), 1);
        let errors = report.get("filters.1.nested.0.field").unwrap();
        assert_eq!(errors[0].kind, FieldErrorKind::UnknownField);
    }

    #[test]
    fn errors_are_collected_across_sections() {
        let report = rejected(json!({
            "filters": [{"field": "votes", "operator": "like", "value": "1"}],
            "sort": [{"field": "title", "direction": "DESC"}],
            "scopes": [{"name": "drafts"}],
            "page": {"size": 100},
        }));

        assert!(report.contains("filters.0.operator"));
        assert!(report.contains("sort.0.direction"));
        assert!(report.contains("scopes.0.name"));
        assert!(report.contains("page.size"));
    }

    #[test]
    fn leaf_without_field_or_nested_is_required() {
        let report = rejected(json!({"filters": [{"value": "x"}]}));
        assert_eq!(
            report.get("filters.0.field").unwrap()[0].kind,
            FieldErrorKind::Required
        );
    }

    #[test]
    fn group_type_must_be_and_or_or() {
        let report = rejected(json!({"filters": [{"type": "xor", "nested": []}]}));
        assert!(report.contains("filters.0.type"));
    }

    #[test]
    fn membership_requires_non_empty_array() {
        let report = rejected(json!({"filters": [
            {"field": "title", "operator": "in", "value": "a"},
            {"field": "title", "operator": "not in", "value": []},
            {"field": "votes", "operator": "in", "value": [1, "two"]},
        ]}));
        assert!(report.contains("filters.0.value"));
        assert!(report.contains("filters.1.value"));
        assert!(report.contains("filters.2.value.1"));
        assert!(!report.contains("filters.2.value.0"));
    }

    #[test]
    fn scalar_operators_reject_arrays_unless_null_or_set() {
        let report = rejected(json!({"filters": [
            {"field": "title", "operator": ">", "value": ["a"]},
        ]}));
        assert!(report.contains("filters.0.value"));

        let request = validate(json!({"filters": [
            {"field": "publish_at", "value": [null, "2024-01-01"]},
        ]}))
        .unwrap();
        assert_eq!(request.filters.len(), 1);
    }

    #[test]
    fn value_rules() {
        let request = validate(json!({"filters": [
            {"field": "votes", "value": "1"},
            {"field": "votes", "value": ""},
            {"field": "title"},
            {"field": "publish_at", "value": "2024-01-01 10:00:00"},
        ]}));
        assert!(request.is_ok());

        let report = rejected(json!({"filters": [
            {"field": "votes", "value": "1.5"},
            {"field": "publish_at", "value": "now"},
            {"field": "publish_at", "value": 1},
            {"field": "title", "value": 5},
        ]}));
        assert_eq!(report.len(), 4);
    }

    #[test]
    fn empty_string_values_become_null() {
        let request = validate(json!({"filters": [
            {"field": "publish_at", "value": ""},
            {"field": "votes", "operator": "in", "value": ["", 3]},
        ]}))
        .unwrap();
        let FilterNode::Leaf(date) = &request.filters[0] else {
            panic!("expected a leaf");
        };
        assert_eq!(date.value, Value::Null);
        let FilterNode::Leaf(votes) = &request.filters[1] else {
            panic!("expected a leaf");
        };
        assert_eq!(votes.value, json!([null, 3]));
    }

    #[test]
    fn missing_values_only_pass_for_equality() {
        assert!(validate(json!({"filters": [{"field": "publish_at"}]})).is_ok());
        assert!(validate(json!({"filters": [{"field": "title", "operator": "!="}]})).is_ok());

        let report = rejected(json!({"filters": [
            {"field": "publish_at", "operator": ">"},
            {"field": "nope"},
            {"field": "title", "operator": "like", "value": ""},
        ]}));
        assert!(report.contains("filters.0.value"));
        assert!(report.contains("filters.1.field"));
        assert!(report.contains("filters.2.value"));
    }

    #[test]
    fn operator_spelling_variants_parse() {
        let request = validate(json!({"filters": [
            {"field": "title", "operator": "not-like", "value": "%a%"},
        ]}))
        .unwrap();
        let FilterNode::Leaf(leaf) = &request.filters[0] else {
            panic!("expected a leaf");
        };
        assert_eq!(leaf.operator, Operator::NotLike);
    }

    #[test]
    fn page_rules() {
        let request = validate(json!({"page": {"size": "2", "number": 3}})).unwrap();
        assert_eq!(request.page.size, Some(2));
        assert_eq!(request.page.number, Some(3));

        let report = rejected(json!({"page": {"size": 0, "number": 0}}));
        assert!(report.contains("page.size"));
        assert!(report.contains("page.number"));

        let report = rejected(json!({"page": {"number": 1, "cursor": "abc"}}));
        assert!(report.contains("page.cursor"));
    }

    #[test]
    fn include_total_count_accepts_loose_booleans() {
        let request = validate(json!({"page": {"include_total_count": "true"}})).unwrap();
        assert_eq!(request.page.include_total_count, Some(true));

        let report = rejected(json!({"page": {"include_total_count": "yes"}}));
        assert!(report.contains("page.include_total_count"));
    }

    #[test]
    fn custom_page_parameter_names() {
        let registries = registries();
        let mut config = SearchConfig::default();
        config.pagination.pagination_parameter = "pagination".into();
        config.pagination.size_parameter = "per_page".into();

        let request = DescriptorValidator::new(&registries, &config)
            .validate(&json!({"pagination": {"per_page": 5}}))
            .unwrap();
        assert_eq!(request.page.size, Some(5));
    }

    #[test]
    fn search_and_sort() {
        let request = validate(json!({
            "search": {"value": "special", "case_sensitive": false},
            "sort": [{"field": "title", "direction": "desc"}],
            "scopes": [{"name": "published", "parameters": [true]}],
        }))
        .unwrap();

        assert_eq!(request.search.unwrap().value.as_deref(), Some("special"));
        assert_eq!(request.sort[0].direction, SortDirection::Desc);
        assert_eq!(request.scopes[0].parameters, vec![json!(true)]);

        let report = rejected(json!({"search": {"value": 5, "case_sensitive": "maybe"}}));
        assert!(report.contains("search.value"));
        assert!(report.contains("search.case_sensitive"));
    }
}
