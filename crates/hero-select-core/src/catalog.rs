use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{value_kind, DocumentSource};
use crate::error::SelectError;

pub const PREFERENCE_FIELD: &str = "preference";
pub const DEFAULT_DISPLAY_FIELD: &str = "image_prefix";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A categorical attribute, resolved once at load time.
///
/// Scalars are normalized to text (`3` becomes `"3"`) so filters always compare text.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Scalar(String),
    TagSet(Vec<String>),
}

impl AttributeValue {
    #[must_use]
    pub fn values(&self) -> &[String] {
        match self {
            Self::Scalar(value) => std::slice::from_ref(value),
            Self::TagSet(values) => values,
        }
    }

    /// Scalar: membership. Tag set: non-empty intersection.
    #[must_use]
    pub fn matches_any(&self, allowed: &BTreeSet<&str>) -> bool {
        match self {
            Self::Scalar(value) => allowed.contains(value.as_str()),
            Self::TagSet(values) => values.iter().any(|value| allowed.contains(value.as_str())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub preference: f64,
    pub display_reference: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Entity {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Human-facing name: `anti_mage` becomes `Anti Mage`.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(self.id.as_str())
    }
}

#[must_use]
pub fn display_name(id: &str) -> String {
    id.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Which document wins when both define the same field, and which one decides
/// catalog membership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeDirection {
    /// Membership and order come from the attributes document; preference
    /// fields overwrite attribute fields.
    #[default]
    PreferencesOverAttributes,
    /// Membership and order come from the preferences document; attribute
    /// fields overwrite preference fields.
    AttributesOverPreferences,
}

impl MergeDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreferencesOverAttributes => "preferences_over_attributes",
            Self::AttributesOverPreferences => "attributes_over_preferences",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderOptions {
    pub merge: MergeDirection,
    pub default_preference: f64,
    pub display_field: String,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            merge: MergeDirection::default(),
            default_preference: 0.0,
            display_field: DEFAULT_DISPLAY_FIELD.to_string(),
        }
    }
}

/// Ordered, immutable table of entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    entities: Vec<Entity>,
    positions: HashMap<EntityId, usize>,
}

impl Serialize for Catalog {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entities.serialize(serializer)
    }
}

impl Catalog {
    /// Build a catalog from already-merged entities. Later duplicates are dropped.
    #[must_use]
    pub fn from_entities(entities: Vec<Entity>) -> Self {
        let mut positions = HashMap::with_capacity(entities.len());
        let mut kept = Vec::with_capacity(entities.len());
        for entity in entities {
            if positions.contains_key(&entity.id) {
                tracing::warn!(id = %entity.id, "duplicate entity identifier dropped");
                continue;
            }
            positions.insert(entity.id.clone(), kept.len());
            kept.push(entity);
        }
        Self { entities: kept, positions }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.position(id).and_then(|index| self.entities.get(index))
    }

    #[must_use]
    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Every attribute name carried by at least one entity.
    #[must_use]
    pub fn attribute_names(&self) -> BTreeSet<&str> {
        self.entities
            .iter()
            .flat_map(|entity| entity.attributes.keys().map(String::as_str))
            .collect()
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.entities.iter().any(|entity| entity.attributes.contains_key(name))
    }

    /// Distinct values of an attribute in first-seen order.
    #[must_use]
    pub fn distinct_values(&self, name: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for value in self.entities.iter().filter_map(|entity| entity.attribute(name)) {
            for item in value.values() {
                if seen.insert(item.as_str()) {
                    ordered.push(item.clone());
                }
            }
        }
        ordered
    }
}

#[derive(Debug, Default)]
struct RecordFields {
    preference: Option<f64>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl RecordFields {
    fn overlay(mut self, top: Self) -> Self {
        if top.preference.is_some() {
            self.preference = top.preference;
        }
        self.attributes.extend(top.attributes);
        self
    }
}

/// Merge an attributes document and a preferences document into a catalog.
///
/// # Errors
/// Returns [`SelectError::MalformedInput`] when either document cannot be parsed,
/// an entry is not a mapping, an attribute is neither a scalar nor a list of
/// scalars, a preference is not a finite number, or the merge yields no entities.
pub fn load(
    attributes: &DocumentSource,
    preferences: &DocumentSource,
    options: &LoaderOptions,
) -> Result<Catalog, SelectError> {
    let attribute_map = attributes.parse_mapping()?;
    let preference_map = preferences.parse_mapping()?;

    // The non-member document always wins field conflicts.
    let (members, members_doc, others, others_doc) = match options.merge {
        MergeDirection::PreferencesOverAttributes => {
            (&attribute_map, attributes.name(), &preference_map, preferences.name())
        }
        MergeDirection::AttributesOverPreferences => {
            (&preference_map, preferences.name(), &attribute_map, attributes.name())
        }
    };

    let mut entities = Vec::with_capacity(members.len());
    for (id, record) in members {
        let member_fields = record_fields(members_doc, id, record)?;
        let merged = match others.get(id) {
            Some(overlay) => member_fields.overlay(record_fields(others_doc, id, overlay)?),
            None if options.merge == MergeDirection::AttributesOverPreferences => {
                tracing::warn!(id = %id, document = %others_doc, "no attributes for entity; skipped");
                continue;
            }
            None => member_fields,
        };
        entities.push(build_entity(id, merged, options));
    }

    if options.merge == MergeDirection::PreferencesOverAttributes {
        for id in others.keys().filter(|id| !members.contains_key(*id)) {
            tracing::warn!(id = %id, document = %others_doc, "entity has no attributes; ignored");
        }
    }

    if entities.is_empty() {
        return Err(SelectError::malformed(members_doc, "no entities after merging documents"));
    }

    tracing::debug!(
        entities = entities.len(),
        merge = options.merge.as_str(),
        attributes = %attributes.name(),
        preferences = %preferences.name(),
        "catalog loaded"
    );
    Ok(Catalog::from_entities(entities))
}

fn record_fields(document: &str, id: &str, record: &Value) -> Result<RecordFields, SelectError> {
    let Value::Object(fields) = record else {
        return Err(SelectError::malformed(
            document,
            format!("entry `{id}` must be a mapping, found {}", value_kind(record)),
        ));
    };
    parse_fields(document, id, fields)
}

fn parse_fields(
    document: &str,
    id: &str,
    fields: &Map<String, Value>,
) -> Result<RecordFields, SelectError> {
    let mut parsed = RecordFields::default();
    for (name, value) in fields {
        if name == PREFERENCE_FIELD {
            parsed.preference = parse_preference(document, id, value)?;
            continue;
        }
        if let Some(attribute) = parse_attribute(document, id, name, value)? {
            parsed.attributes.insert(name.clone(), attribute);
        }
    }
    Ok(parsed)
}

fn parse_preference(document: &str, id: &str, value: &Value) -> Result<Option<f64>, SelectError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => match number.as_f64() {
            Some(score) if score.is_finite() => Ok(Some(score)),
            _ => Err(SelectError::malformed(
                document,
                format!("preference of `{id}` is not a finite number"),
            )),
        },
        other => Err(SelectError::malformed(
            document,
            format!("preference of `{id}` must be a number, found {}", value_kind(other)),
        )),
    }
}

fn parse_attribute(
    document: &str,
    id: &str,
    name: &str,
    value: &Value,
) -> Result<Option<AttributeValue>, SelectError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                scalar_text(item).ok_or_else(|| {
                    SelectError::malformed(
                        document,
                        format!("attribute `{name}` of `{id}` lists {}", value_kind(item)),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|values| Some(AttributeValue::TagSet(values))),
        other => scalar_text(other).map(AttributeValue::Scalar).map(Some).ok_or_else(|| {
            SelectError::malformed(
                document,
                format!(
                    "attribute `{name}` of `{id}` must be a scalar or a list of scalars, found {}",
                    value_kind(other)
                ),
            )
        }),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn build_entity(id: &str, fields: RecordFields, options: &LoaderOptions) -> Entity {
    let display_reference = match fields.attributes.get(&options.display_field) {
        Some(AttributeValue::Scalar(reference)) => reference.clone(),
        _ => id.to_string(),
    };
    Entity {
        id: EntityId(id.to_string()),
        preference: fields.preference.unwrap_or(options.default_preference),
        display_reference,
        attributes: fields.attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(name: &str, text: &str) -> DocumentSource {
        DocumentSource::json(name, text)
    }

    fn load_ok(attributes: &str, preferences: &str, options: &LoaderOptions) -> Catalog {
        match load(&json("attributes.json", attributes), &json("preferences.json", preferences), options)
        {
            Ok(catalog) => catalog,
            Err(err) => panic!("catalog should load: {err}"),
        }
    }

    fn entity<'a>(catalog: &'a Catalog, id: &str) -> &'a Entity {
        catalog.get(&EntityId::from(id)).unwrap_or_else(|| panic!("missing entity {id}"))
    }

    #[test]
    fn preferences_merge_into_attributes() {
        let catalog = load_ok(
            r#"{"axe": {"primary_stat": "strength", "attack_type": "melee"}}"#,
            r#"{"axe": {"preference": 3}}"#,
            &LoaderOptions::default(),
        );

        let axe = entity(&catalog, "axe");
        assert_eq!(catalog.len(), 1);
        assert!((axe.preference - 3.0).abs() < f64::EPSILON);
        assert_eq!(axe.attribute("primary_stat"), Some(&AttributeValue::Scalar("strength".into())));
        assert_eq!(axe.attribute("attack_type"), Some(&AttributeValue::Scalar("melee".into())));
        assert_eq!(axe.display_reference, "axe");
    }

    #[test]
    fn preference_fields_overwrite_per_field() {
        let catalog = load_ok(
            r#"{"axe": {"primary_stat": "strength", "attack_type": "melee"}}"#,
            r#"{"axe": {"preference": 1, "attack_type": "ranged"}, "ghost": {"preference": 4}}"#,
            &LoaderOptions::default(),
        );

        let axe = entity(&catalog, "axe");
        assert_eq!(axe.attribute("attack_type"), Some(&AttributeValue::Scalar("ranged".into())));
        assert_eq!(axe.attribute("primary_stat"), Some(&AttributeValue::Scalar("strength".into())));
        assert!(catalog.get(&EntityId::from("ghost")).is_none());
    }

    #[test]
    fn attributes_win_and_preferences_decide_membership_when_reversed() {
        let options = LoaderOptions {
            merge: MergeDirection::AttributesOverPreferences,
            ..LoaderOptions::default()
        };
        let catalog = load_ok(
            r#"{"axe": {"attack_type": "melee"}, "lina": {"attack_type": "ranged"}, "sven": {"attack_type": "melee"}}"#,
            r#"{"sven": {"preference": 2, "attack_type": "ranged"}, "axe": {"preference": 1}, "ghost": {"preference": 4}}"#,
            &options,
        );

        let ids: Vec<&str> = catalog.entities().iter().map(|entity| entity.id.as_str()).collect();
        assert_eq!(ids, vec!["sven", "axe"]);
        assert_eq!(
            entity(&catalog, "sven").attribute("attack_type"),
            Some(&AttributeValue::Scalar("melee".into()))
        );
    }

    #[test]
    fn missing_preference_uses_default() {
        let options = LoaderOptions { default_preference: 2.5, ..LoaderOptions::default() };
        let catalog = load_ok(r#"{"axe": {"attack_type": "melee"}}"#, "{}", &options);
        assert!((entity(&catalog, "axe").preference - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn lists_become_tag_sets_and_scalars_become_text() {
        let catalog = load_ok(
            r#"{"axe": {"roles": ["initiator", "durable"], "complexity": 1, "captains_mode": true, "image_prefix": "axe_png", "legs": null}}"#,
            "{}",
            &LoaderOptions::default(),
        );

        let axe = entity(&catalog, "axe");
        assert_eq!(
            axe.attribute("roles"),
            Some(&AttributeValue::TagSet(vec!["initiator".into(), "durable".into()]))
        );
        assert_eq!(axe.attribute("complexity"), Some(&AttributeValue::Scalar("1".into())));
        assert_eq!(axe.attribute("captains_mode"), Some(&AttributeValue::Scalar("true".into())));
        assert_eq!(axe.attribute("legs"), None);
        assert_eq!(axe.display_reference, "axe_png");
    }

    #[test]
    fn malformed_documents_name_the_offender() {
        let result = load(
            &json("attributes.json", r#"{"axe": {}}"#),
            &json("preferences.json", r#"{"axe": {"preference": 3"#),
            &LoaderOptions::default(),
        );
        match result {
            Err(SelectError::MalformedInput { document, .. }) => {
                assert_eq!(document, "preferences.json");
            }
            other => panic!("expected malformed preferences, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_preference_is_malformed() {
        let result = load(
            &json("attributes.json", r#"{"axe": {}}"#),
            &json("preferences.json", r#"{"axe": {"preference": "lots"}}"#),
            &LoaderOptions::default(),
        );
        assert!(matches!(
            result,
            Err(SelectError::MalformedInput { ref document, .. }) if document == "preferences.json"
        ));
    }

    #[test]
    fn non_finite_yaml_preference_is_malformed() {
        let options = LoaderOptions { default_preference: 1.5, ..LoaderOptions::default() };
        for preference in [".nan", ".inf", "-.inf"] {
            let result = load(
                &DocumentSource::yaml("a.yaml", "axe: {attack_type: melee}\n"),
                &DocumentSource::yaml("p.yaml", format!("axe:\n  preference: {preference}\n")),
                &options,
            );
            assert!(
                matches!(
                    result,
                    Err(SelectError::MalformedInput { ref document, .. }) if document == "p.yaml"
                ),
                "{preference} loaded as {result:?}"
            );
        }
    }

    #[test]
    fn nested_attribute_values_are_malformed() {
        let result = load(
            &json("attributes.json", r#"{"axe": {"stats": {"armor": 2}}}"#),
            &json("preferences.json", "{}"),
            &LoaderOptions::default(),
        );
        assert!(matches!(
            result,
            Err(SelectError::MalformedInput { ref document, .. }) if document == "attributes.json"
        ));
    }

    #[test]
    fn empty_merge_is_rejected() {
        let options = LoaderOptions {
            merge: MergeDirection::AttributesOverPreferences,
            ..LoaderOptions::default()
        };
        let result = load(
            &json("attributes.json", r#"{"axe": {}}"#),
            &json("preferences.json", r#"{"lina": {"preference": 1}}"#),
            &options,
        );
        assert!(matches!(result, Err(SelectError::MalformedInput { .. })));
    }

    #[test]
    fn catalog_order_follows_document_order() {
        let catalog = load_ok(
            r#"{"zeus": {}, "axe": {}, "mirana": {}}"#,
            "{}",
            &LoaderOptions::default(),
        );
        let ids: Vec<&str> = catalog.entities().iter().map(|entity| entity.id.as_str()).collect();
        assert_eq!(ids, vec!["zeus", "axe", "mirana"]);
        assert_eq!(catalog.position(&EntityId::from("mirana")), Some(2));
    }

    #[test]
    fn distinct_values_cover_scalars_and_tags() {
        let catalog = load_ok(
            r#"{"axe": {"roles": ["initiator", "durable"]}, "lina": {"roles": ["nuker", "initiator"]}}"#,
            "{}",
            &LoaderOptions::default(),
        );
        assert_eq!(catalog.distinct_values("roles"), vec!["initiator", "durable", "nuker"]);
        assert!(catalog.distinct_values("missing").is_empty());
    }

    #[test]
    fn display_names_are_title_cased() {
        assert_eq!(display_name("anti_mage"), "Anti Mage");
        assert_eq!(display_name("queen_of_pain"), "Queen Of Pain");
        assert_eq!(display_name("AXE"), "Axe");
    }
}
