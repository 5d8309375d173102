use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::document::{value_kind, DocumentSource};
use crate::error::SelectError;

/// Axis name to the values the user ticked for that axis.
pub type FilterSelections = BTreeMap<String, Vec<String>>;

/// Eligibility bits aligned with catalog order. `None` at the call sites means
/// "no filter applied", which is not the same thing as an all-true mask.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct Mask(Vec<bool>);

impl Mask {
    #[must_use]
    pub fn all(len: usize) -> Self {
        Self(vec![true; len])
    }

    #[must_use]
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.0.iter().filter(|bit| **bit).count()
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.0.iter().all(|bit| *bit)
    }

    /// Catalog positions still eligible under this mask.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.0.iter().enumerate().filter_map(|(index, bit)| bit.then_some(index)).collect()
    }

    /// Both masks must come from the same catalog.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        debug_assert_eq!(self.len(), other.len(), "masks from different catalogs");
        Self(self.0.iter().zip(&other.0).map(|(left, right)| *left && *right).collect())
    }
}

/// Mask of entities whose `axis` value is among `allowed`.
///
/// # Errors
/// Returns [`SelectError::UnknownAttributeAxis`] when no entity carries `axis`.
pub fn build_mask<S: AsRef<str>>(
    catalog: &Catalog,
    axis: &str,
    allowed: &[S],
) -> Result<Mask, SelectError> {
    if !catalog.has_attribute(axis) {
        return Err(SelectError::UnknownAttributeAxis(axis.to_string()));
    }
    let allowed: BTreeSet<&str> = allowed.iter().map(AsRef::as_ref).collect();
    Ok(Mask(
        catalog
            .entities()
            .iter()
            .map(|entity| entity.attribute(axis).is_some_and(|value| value.matches_any(&allowed)))
            .collect(),
    ))
}

/// Logical AND where an absent mask is the identity.
#[must_use]
pub fn combine(left: Option<Mask>, right: Option<Mask>) -> Option<Mask> {
    match (left, right) {
        (None, None) => None,
        (Some(mask), None) | (None, Some(mask)) => Some(mask),
        (Some(left), Some(right)) => Some(left.and(&right)),
    }
}

/// Combined mask for every axis in `selections`.
///
/// An axis with no selected values does not restrict anything, so the result is
/// `None` when every axis is empty.
///
/// # Errors
/// Returns [`SelectError::UnknownAttributeAxis`] for an axis the catalog does not
/// carry, and [`SelectError::NoMatch`] when the combination leaves no entity.
pub fn compose_filters(
    catalog: &Catalog,
    selections: &FilterSelections,
) -> Result<Option<Mask>, SelectError> {
    if let Some(axis) = selections.keys().find(|axis| !catalog.has_attribute(axis)) {
        return Err(SelectError::UnknownAttributeAxis(axis.clone()));
    }

    let mut combined = None;
    for (axis, values) in selections {
        if values.is_empty() {
            continue;
        }
        combined = combine(combined, Some(build_mask(catalog, axis, values.as_slice())?));
    }

    if let Some(mask) = &combined {
        if mask.selected_count() == 0 {
            return Err(SelectError::NoMatch { selections: selections.clone() });
        }
    }
    Ok(combined)
}

/// The filter axes offered to the user and the values listed for each.
#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
pub struct FilterDefinitions {
    axes: Vec<FilterAxis>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FilterAxis {
    pub name: String,
    pub values: Vec<String>,
}

impl FilterDefinitions {
    /// # Errors
    /// Returns [`SelectError::MalformedInput`] when the document is not a mapping of
    /// axis names to lists of scalars.
    pub fn parse(source: &DocumentSource) -> Result<Self, SelectError> {
        let mapping = source.parse_mapping()?;
        let mut axes = Vec::with_capacity(mapping.len());
        for (name, value) in mapping {
            let Value::Array(items) = &value else {
                return Err(SelectError::malformed(
                    source.name(),
                    format!("filter `{name}` must list its values, found {}", value_kind(&value)),
                ));
            };
            let values = items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    Value::Number(number) => Ok(number.to_string()),
                    Value::Bool(flag) => Ok(flag.to_string()),
                    other => Err(SelectError::malformed(
                        source.name(),
                        format!("filter `{name}` lists {}", value_kind(other)),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            axes.push(FilterAxis { name, values });
        }
        Ok(Self { axes })
    }

    /// Definitions derived from the catalog itself, one axis per attribute name.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog, axes: &[&str]) -> Self {
        Self {
            axes: axes
                .iter()
                .map(|name| FilterAxis {
                    name: (*name).to_string(),
                    values: catalog.distinct_values(name),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn axes(&self) -> &[FilterAxis] {
        &self.axes
    }

    #[must_use]
    pub fn values(&self, axis: &str) -> Option<&[String]> {
        self.axes.iter().find(|candidate| candidate.name == axis).map(|axis| axis.values.as_slice())
    }

    /// Every offered axis has to exist in the catalog.
    ///
    /// # Errors
    /// Returns [`SelectError::UnknownAttributeAxis`] for the first axis the catalog
    /// does not carry.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), SelectError> {
        match self.axes.iter().find(|axis| !catalog.has_attribute(&axis.name)) {
            Some(axis) => Err(SelectError::UnknownAttributeAxis(axis.name.clone())),
            None => Ok(()),
        }
    }

    /// Selections with nothing ticked on any axis.
    #[must_use]
    pub fn empty_selections(&self) -> FilterSelections {
        self.axes.iter().map(|axis| (axis.name.clone(), Vec::new())).collect()
    }
}
