//! Atom services: the periodic-table dataset and the synthetic workloads an
//! atom call can request.

pub mod workload;

use crate::core::types::AtomDescriptor;
use serde::Deserialize;
use std::collections::HashMap;
use workload::WorkloadError;

const ELEMENTS_YAML: &str = include_str!("../../data/elements.yaml");

#[derive(Debug, Deserialize)]
struct ElementsFile {
    elements: Vec<AtomDescriptor>,
}

/// Element table keyed by lower-case symbol.
#[derive(Debug, Clone)]
pub struct Elements {
    by_symbol: HashMap<String, AtomDescriptor>,
}

impl Elements {
    /// The table bundled with the binary.
    pub fn builtin() -> Result<Self, String> {
        Self::parse(ELEMENTS_YAML)
    }

    /// Parse an element table from YAML.
    pub fn parse(yaml: &str) -> Result<Self, String> {
        let file: ElementsFile =
            serde_yaml_ng::from_str(yaml).map_err(|e| format!("elements parse error: {}", e))?;
        let mut by_symbol = HashMap::with_capacity(file.elements.len());
        for element in file.elements {
            let key = element.symbol.to_ascii_lowercase();
            if by_symbol.contains_key(&key) {
                return Err(format!("duplicate element symbol '{}'", element.symbol));
            }
            by_symbol.insert(key, element);
        }
        Ok(Self { by_symbol })
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, symbol: &str) -> Option<&AtomDescriptor> {
        self.by_symbol.get(&symbol.to_ascii_lowercase())
    }

    /// Look up an element this deployment is allowed to serve.
    pub fn resolve(&self, symbol: &str, max_number: u32) -> Result<&AtomDescriptor, WorkloadError> {
        let element = self
            .get(symbol)
            .ok_or_else(|| WorkloadError::UnknownElement(symbol.to_string()))?;
        if element.number > max_number {
            return Err(WorkloadError::BeyondMaxNumber {
                symbol: element.symbol.clone(),
                number: element.number,
                max_number,
            });
        }
        Ok(element)
    }
}
