use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strato_domain::{Component, ComponentSpec, Kind, Metadata, Service, Stack};
use tracing::debug;

use crate::error::ConfigError;
use crate::interpolate::{interpolate_value, Scope};
use crate::raw::{RawDocument, RawServiceSpec, RawStackSpec};
use crate::validate;

/// A fully parsed, interpolated, and validated stack folder.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub stack: Stack,
    pub services: Vec<Service>,
    pub components: Vec<Component>,
    pub warnings: Vec<String>,
}

impl ParseResult {
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.metadata.name == name)
    }
}

/// Load a stack folder.
///
/// Expected layout:
/// ```text
/// <dir>/
///   stack.yaml               one document: kind=Stack
///   services/
///     <svc>/
///       service.yaml         one document: kind=Service
///       *.yaml               any number of component documents
/// ```
/// Documents are `---`-separated multi-document YAML.
pub fn load_stack(dir: &Path) -> Result<ParseResult, ConfigError> {
    let mut warnings = Vec::new();

    let stack_path = existing_yaml(dir, "stack")
        .ok_or_else(|| ConfigError::StackDocumentMissing(dir.display().to_string()))?;
    debug!(path = %stack_path.display(), "loading stack document");

    let mut stack: Option<Stack> = None;
    for doc in read_documents(&stack_path, &mut warnings)? {
        match doc.kind.as_str() {
            "Stack" => install_stack(&mut stack, doc, &stack_path)?,
            other => {
                return Err(ConfigError::UnknownKind {
                    kind: other.to_string(),
                    path: stack_path.display().to_string(),
                })
            }
        }
    }
    let stack = stack
        .ok_or_else(|| ConfigError::StackDocumentMissing(stack_path.display().to_string()))?;

    // Collect services and raw component documents from the service tree.
    let mut services: Vec<Service> = Vec::new();
    let mut raw_components: Vec<(RawDocument, PathBuf, String)> = Vec::new();

    let services_dir = dir.join("services");
    if services_dir.is_dir() {
        let mut entries = read_dir_sorted(&services_dir)?;
        entries.retain(|p| p.is_dir());
        for svc_dir in entries {
            let svc_name = svc_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let Some(svc_doc_path) = existing_yaml(&svc_dir, "service") else {
                warnings.push(format!(
                    "service directory '{}' has no service.yaml; skipped",
                    svc_dir.display()
                ));
                continue;
            };
            for doc in read_documents(&svc_doc_path, &mut warnings)? {
                match doc.kind.as_str() {
                    // `kind: Service` is also a component kind (the ECS-style
                    // workload); component documents carry the components
                    // apiVersion, grouping documents do not.
                    "Service" if !is_component_doc(&doc) => {
                        services.push(convert_service(doc, &stack, &svc_name, &svc_doc_path)?)
                    }
                    "Stack" => {
                        return Err(ConfigError::MultipleStacks {
                            first: stack.name.clone(),
                            second: doc.metadata.name,
                        })
                    }
                    _ => raw_components.push((doc, svc_doc_path.clone(), svc_name.clone())),
                }
            }

            for path in read_dir_sorted(&svc_dir)? {
                if !is_yaml(&path) || path == svc_doc_path {
                    continue;
                }
                for doc in read_documents(&path, &mut warnings)? {
                    match doc.kind.as_str() {
                        "Stack" => {
                            return Err(ConfigError::MultipleStacks {
                                first: stack.name.clone(),
                                second: doc.metadata.name,
                            })
                        }
                        _ => raw_components.push((doc, path.clone(), svc_name.clone())),
                    }
                }
            }
        }
    }

    warn_unused_variables(&stack, &raw_components, &mut warnings);

    // Convert raw component documents: kind dispatch, interpolation, typing.
    let service_names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
    let empty = BTreeMap::new();
    let mut components = Vec::with_capacity(raw_components.len());
    for (doc, path, dir_service) in raw_components {
        let kind: Kind = doc.kind.parse().map_err(|_| ConfigError::UnknownKind {
            kind: doc.kind.clone(),
            path: path.display().to_string(),
        })?;

        let name = doc.metadata.name.clone();
        let service = doc.metadata.service.clone().unwrap_or(dir_service);
        if let Some(declared) = &doc.metadata.stack {
            if declared != &stack.name {
                return Err(ConfigError::CrossStackReference {
                    component: name,
                    declared: declared.clone(),
                    expected: stack.name.clone(),
                });
            }
        }

        let service_vars = services
            .iter()
            .find(|s| s.name == service)
            .map(|s| &s.variables)
            .unwrap_or(&empty);
        let mut spec_value = doc.spec;
        interpolate_value(
            &mut spec_value,
            &Scope {
                stack: &stack.variables,
                service: service_vars,
                service_names: &service_names,
                component: &name,
            },
        )?;

        let spec = ComponentSpec::from_value(kind, spec_value)?;
        components.push(Component {
            metadata: Metadata {
                name,
                stack: stack.name.clone(),
                service,
                labels: doc.metadata.labels,
            },
            spec,
            depends_on: doc.depends_on,
        });
    }

    validate::validate(&stack, &services, &components)?;

    debug!(
        stack = %stack.name,
        services = services.len(),
        components = components.len(),
        "stack folder loaded"
    );
    Ok(ParseResult { stack, services, components, warnings })
}

fn install_stack(
    slot: &mut Option<Stack>,
    doc: RawDocument,
    path: &Path,
) -> Result<(), ConfigError> {
    let spec: RawStackSpec =
        serde_json::from_value(doc.spec).map_err(|e| ConfigError::Conversion {
            path: path.display().to_string(),
            message: format!("bad Stack spec: {}", e),
        })?;
    let stack = Stack {
        name: doc.metadata.name,
        tenant: spec.tenant,
        provider: spec.provider,
        region: spec.region,
        variables: spec.variables,
        labels: doc.metadata.labels,
    };
    match slot {
        Some(existing) => Err(ConfigError::MultipleStacks {
            first: existing.name.clone(),
            second: stack.name,
        }),
        None => {
            *slot = Some(stack);
            Ok(())
        }
    }
}

fn convert_service(
    doc: RawDocument,
    stack: &Stack,
    dir_name: &str,
    path: &Path,
) -> Result<Service, ConfigError> {
    let spec: RawServiceSpec = serde_json::from_value(doc.spec).unwrap_or_default();
    let name = if doc.metadata.name.is_empty() {
        dir_name.to_string()
    } else {
        doc.metadata.name
    };
    if let Some(declared) = &doc.metadata.stack {
        if declared != &stack.name {
            return Err(ConfigError::CrossStackReference {
                component: name,
                declared: declared.clone(),
                expected: stack.name.clone(),
            });
        }
    }
    debug!(service = %name, path = %path.display(), "loaded service document");
    Ok(Service {
        name,
        stack: stack.name.clone(),
        variables: spec.variables,
        labels: doc.metadata.labels,
    })
}

/// Parse every non-empty document in a `---`-separated YAML file.
fn read_documents(
    path: &Path,
    warnings: &mut Vec<String>,
) -> Result<Vec<RawDocument>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(de).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;
        if value.is_null() {
            warnings.push(format!("empty document in {}", path.display()));
            continue;
        }
        let doc: RawDocument =
            serde_yaml::from_value(value).map_err(|e| ConfigError::YamlParse {
                path: path.display().to_string(),
                source: e,
            })?;
        docs.push(doc);
    }
    Ok(docs)
}

fn warn_unused_variables(
    stack: &Stack,
    raw_components: &[(RawDocument, PathBuf, String)],
    warnings: &mut Vec<String>,
) {
    if stack.variables.is_empty() {
        return;
    }
    let haystack: String = raw_components
        .iter()
        .map(|(doc, _, _)| doc.spec.to_string())
        .collect();
    for var in stack.variables.keys() {
        if !haystack.contains(&format!("${{{}}}", var)) {
            warnings.push(format!("stack variable '{}' is never referenced", var));
        }
    }
}

fn is_component_doc(doc: &RawDocument) -> bool {
    doc.api_version
        .as_deref()
        .map_or(false, |v| v.starts_with("components."))
}

fn existing_yaml(dir: &Path, stem: &str) -> Option<PathBuf> {
    for ext in ["yaml", "yml"] {
        let path = dir.join(format!("{}.{}", stem, ext));
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

fn is_yaml(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}
