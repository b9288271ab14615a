use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ConfigError;

/// Variable scopes visible to one component during interpolation.
pub struct Scope<'a> {
    /// Stack-level variables: `${VAR}`.
    pub stack: &'a BTreeMap<String, String>,
    /// The component's own service variables: `${service.VAR}`.
    pub service: &'a BTreeMap<String, String>,
    /// Names of all services in the stack, for cross-service detection.
    pub service_names: &'a [String],
    /// The component name, for error context.
    pub component: &'a str,
}

/// Resolve `${...}` tokens in every string leaf of `value`, in place.
///
/// `${VAR}` resolves against the stack scope, `${service.VAR}` against the
/// component's own service scope. A dotted prefix naming *another* service is
/// an error, as is any token that resolves to nothing. `${component:...}`
/// tokens are output references resolved at apply time and pass through
/// untouched. Non-string leaves are never rewritten.
pub fn interpolate_value(value: &mut Value, scope: &Scope<'_>) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = interpolate_str(s, scope)?;
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                interpolate_value(item, scope)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_k, v) in map.iter_mut() {
                interpolate_value(v, scope)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn interpolate_str(template: &str, scope: &Scope<'_>) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated token: keep the literal text.
            result.push_str(rest);
            return Ok(result);
        };
        result.push_str(&rest[..start]);
        let token = &after[..end];
        rest = &after[end + 1..];

        // Reserved namespace: output references survive to apply time.
        if token.starts_with("component:") {
            result.push_str("${");
            result.push_str(token);
            result.push('}');
            continue;
        }

        match token.split_once('.') {
            None => match scope.stack.get(token) {
                Some(val) => result.push_str(val),
                None => {
                    return Err(ConfigError::BadVariableInterpolation {
                        component: scope.component.to_string(),
                        variable: token.to_string(),
                    })
                }
            },
            Some(("service", var)) => match scope.service.get(var) {
                Some(val) => result.push_str(val),
                None => {
                    return Err(ConfigError::BadVariableInterpolation {
                        component: scope.component.to_string(),
                        variable: token.to_string(),
                    })
                }
            },
            Some((prefix, _)) if scope.service_names.iter().any(|s| s == prefix) => {
                return Err(ConfigError::CrossServiceVariable {
                    component: scope.component.to_string(),
                    variable: token.to_string(),
                    other_service: prefix.to_string(),
                });
            }
            Some(_) => {
                return Err(ConfigError::BadVariableInterpolation {
                    component: scope.component.to_string(),
                    variable: token.to_string(),
                });
            }
        }
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(
        stack: &'a BTreeMap<String, String>,
        service: &'a BTreeMap<String, String>,
        names: &'a [String],
    ) -> Scope<'a> {
        Scope { stack, service, service_names: names, component: "uploads" }
    }

    #[test]
    fn stack_variable_resolves() {
        let stack = BTreeMap::from([("ENV".to_string(), "prod".to_string())]);
        let service = BTreeMap::new();
        let names = vec!["api".to_string()];
        let s = scope(&stack, &service, &names);
        assert_eq!(interpolate_str("app-${ENV}", &s).unwrap(), "app-prod");
    }

    #[test]
    fn service_variable_resolves() {
        let stack = BTreeMap::new();
        let service = BTreeMap::from([("TIER".to_string(), "web".to_string())]);
        let names = vec!["api".to_string()];
        let s = scope(&stack, &service, &names);
        assert_eq!(interpolate_str("${service.TIER}-sg", &s).unwrap(), "web-sg");
    }

    #[test]
    fn unresolved_variable_is_error() {
        let stack = BTreeMap::new();
        let service = BTreeMap::new();
        let names = vec![];
        let s = scope(&stack, &service, &names);
        assert!(matches!(
            interpolate_str("${MISSING}", &s),
            Err(ConfigError::BadVariableInterpolation { variable, .. }) if variable == "MISSING"
        ));
    }

    #[test]
    fn cross_service_variable_is_error() {
        let stack = BTreeMap::new();
        let service = BTreeMap::new();
        let names = vec!["api".to_string(), "worker".to_string()];
        let s = scope(&stack, &service, &names);
        assert!(matches!(
            interpolate_str("${worker.QUEUE}", &s),
            Err(ConfigError::CrossServiceVariable { other_service, .. }) if other_service == "worker"
        ));
    }

    #[test]
    fn component_reference_passes_through() {
        let stack = BTreeMap::new();
        let service = BTreeMap::new();
        let names = vec![];
        let s = scope(&stack, &service, &names);
        assert_eq!(
            interpolate_str("${component:sessions.table_name}", &s).unwrap(),
            "${component:sessions.table_name}"
        );
    }

    #[test]
    fn only_string_leaves_are_rewritten() {
        let stack = BTreeMap::from([("N".to_string(), "5".to_string())]);
        let service = BTreeMap::new();
        let names = vec![];
        let s = scope(&stack, &service, &names);
        let mut value = serde_json::json!({
            "count": 5,
            "name": "x-${N}",
            "nested": { "flags": [true, "${N}"] },
        });
        interpolate_value(&mut value, &s).unwrap();
        assert_eq!(value["count"], 5);
        assert_eq!(value["name"], "x-5");
        assert_eq!(value["nested"]["flags"][1], "5");
    }
}
