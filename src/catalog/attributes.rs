//! Variable-attribute tables and their precedence merge

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target name, units and linear scaling for one source variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarAtts {
    /// Name in the derived dataset
    pub name: String,
    /// Units after scaling
    #[serde(default)]
    pub units: String,
    /// Multiplicative factor applied on load
    #[serde(default = "one")]
    pub scale_factor: f64,
    /// Additive offset applied after scaling
    #[serde(default)]
    pub offset: f64,
}

const fn one() -> f64 {
    1.0
}

impl VarAtts {
    /// Rename-only entry.
    pub fn new(name: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            scale_factor: 1.0,
            offset: 0.0,
        }
    }

    /// Set the scale factor.
    #[must_use]
    pub const fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// Set the offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }
}

/// Source variable name to [`VarAtts`].
pub type AttributeTable = BTreeMap<String, VarAtts>;

/// Merged attribute table, immutable once built.
///
/// Precedence: explicit override > per-filetype default > global default.
///
/// ```rust
/// use climate_regrid::catalog::{AttributeTable, ResolvedAttributes, VarAtts};
///
/// let mut global = AttributeTable::new();
/// global.insert("TS".into(), VarAtts::new("Ts", "K"));
/// let mut user = AttributeTable::new();
/// user.insert("TS".into(), VarAtts::new("skin_temp", "K"));
///
/// let atts = ResolvedAttributes::builder().global(&global).overrides(&user).build();
/// assert_eq!(atts.get("TS").unwrap().name, "skin_temp");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedAttributes {
    table: AttributeTable,
}

impl ResolvedAttributes {
    /// Start a builder.
    #[must_use]
    pub fn builder() -> ResolvedAttributesBuilder<'static> {
        ResolvedAttributesBuilder::default()
    }

    /// Look up a source variable.
    #[must_use]
    pub fn get(&self, source_name: &str) -> Option<&VarAtts> {
        self.table.get(source_name)
    }

    /// Target name of a source variable (unchanged if not listed).
    #[must_use]
    pub fn target_name<'a>(&'a self, source_name: &'a str) -> &'a str {
        self.table
            .get(source_name)
            .map_or(source_name, |atts| atts.name.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Iterate over `(source name, attributes)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VarAtts)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Builder for [`ResolvedAttributes`]; inputs are borrowed, never mutated.
#[derive(Debug, Default)]
pub struct ResolvedAttributesBuilder<'a> {
    global: Option<&'a AttributeTable>,
    filetype: Option<&'a AttributeTable>,
    overrides: Option<&'a AttributeTable>,
}

impl<'a> ResolvedAttributesBuilder<'a> {
    /// Global defaults (lowest precedence).
    #[must_use]
    pub fn global<'b>(self, table: &'b AttributeTable) -> ResolvedAttributesBuilder<'b>
    where
        'a: 'b,
    {
        ResolvedAttributesBuilder {
            global: Some(table),
            filetype: self.filetype,
            overrides: self.overrides,
        }
    }

    /// Per-filetype defaults.
    #[must_use]
    pub fn filetype<'b>(self, table: &'b AttributeTable) -> ResolvedAttributesBuilder<'b>
    where
        'a: 'b,
    {
        ResolvedAttributesBuilder {
            global: self.global,
            filetype: Some(table),
            overrides: self.overrides,
        }
    }

    /// Explicit user overrides (highest precedence).
    #[must_use]
    pub fn overrides<'b>(self, table: &'b AttributeTable) -> ResolvedAttributesBuilder<'b>
    where
        'a: 'b,
    {
        ResolvedAttributesBuilder {
            global: self.global,
            filetype: self.filetype,
            overrides: Some(table),
        }
    }

    /// Merge the layers.
    #[must_use]
    pub fn build(self) -> ResolvedAttributes {
        let table = [self.global, self.filetype, self.overrides]
            .into_iter()
            .flatten()
            .flat_map(|layer| layer.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ResolvedAttributes { table }
    }
}
