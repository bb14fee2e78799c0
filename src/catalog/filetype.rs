//! File types (output streams of a model run)

use super::AttributeTable;
use crate::product::{ProductKind, TemplateFamily};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A model output stream such as `atm`, `lnd` or `cvdp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileType {
    name: String,
    families: BTreeSet<TemplateFamily>,
    #[serde(default)]
    attributes: AttributeTable,
}

impl FileType {
    /// Create a file type with templates for `families`.
    pub fn new(name: impl Into<String>, families: impl IntoIterator<Item = TemplateFamily>) -> Self {
        Self {
            name: name.into(),
            families: families.into_iter().collect(),
            attributes: AttributeTable::new(),
        }
    }

    /// Attach a variable-attribute table.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeTable) -> Self {
        self.attributes = attributes;
        self
    }

    /// File type name, used verbatim in file names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template families this file type has.
    #[must_use]
    pub const fn families(&self) -> &BTreeSet<TemplateFamily> {
        &self.families
    }

    /// Per-filetype variable attributes.
    #[must_use]
    pub const fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    /// Whether a file name template exists for `kind`.
    #[must_use]
    pub fn supports(&self, kind: ProductKind) -> bool {
        self.families.contains(&kind.template_family())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_follows_template_family() {
        let atm = FileType::new("atm", [TemplateFamily::Climatology, TemplateFamily::TimeSeries]);
        assert!(atm.supports(ProductKind::Climatology));
        assert!(atm.supports(ProductKind::StationSeries));
        assert!(!atm.supports(ProductKind::Diagnostic));

        let cvdp = FileType::new("cvdp", [TemplateFamily::Diagnostic]);
        assert!(cvdp.supports(ProductKind::Diagnostic));
        assert!(!cvdp.supports(ProductKind::TimeSeries));
    }
}
