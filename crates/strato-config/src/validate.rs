use std::collections::HashSet;

use strato_domain::{validate_name, Component, DomainError, Service, Stack};

use crate::error::ConfigError;

/// Post-parse validation of a stack folder.
///
/// Checks, in order:
/// 1. Stack name rule and non-empty provider/region
/// 2. Service name rule
/// 3. Component name uniqueness within the stack
/// 4. Every component's `service` names an existing service
/// 5. Every `depends_on` entry resolves to a sibling component
/// 6. Kind-specific spec rules
pub fn validate(
    stack: &Stack,
    services: &[Service],
    components: &[Component],
) -> Result<(), ConfigError> {
    stack.validate()?;

    for svc in services {
        if !validate_name(&svc.name) {
            return Err(DomainError::InvalidName(svc.name.clone()).into());
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for comp in components {
        if !seen.insert(comp.metadata.name.as_str()) {
            return Err(ConfigError::DuplicateComponent(comp.metadata.name.clone()));
        }
    }

    let service_names: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    for comp in components {
        if !service_names.contains(comp.metadata.service.as_str()) {
            return Err(ConfigError::UnknownService {
                component: comp.metadata.name.clone(),
                service: comp.metadata.service.clone(),
            });
        }
    }

    for comp in components {
        for dep in comp.depends_on() {
            if dep == &comp.metadata.name || !seen.contains(dep.as_str()) {
                return Err(ConfigError::UnknownDependency {
                    component: comp.metadata.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for comp in components {
        comp.validate()?;
    }

    Ok(())
}
