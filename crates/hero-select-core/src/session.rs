use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::catalog::{load, Catalog, Entity, EntityId, LoaderOptions};
use crate::document::DocumentSource;
use crate::error::SelectError;
use crate::filter::{compose_filters, FilterSelections, Mask};
use crate::probability::{softmax, Distribution};
use crate::selector::draw;

/// One drawn entity, with enough context for a front end to render it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Selection {
    pub id: EntityId,
    pub display_name: String,
    pub display_reference: String,
    pub preference: f64,
    pub probability: f64,
    pub subset_size: usize,
}

/// An eligible entity with its current selection probability.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct WeightedEntity<'a> {
    pub entity: &'a Entity,
    pub probability: f64,
}

/// Everything observable about a session, in catalog order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub entities: Vec<Entity>,
    pub mask: Option<Mask>,
    pub selections: FilterSelections,
    pub subset: Vec<EntityId>,
    pub distribution: Distribution,
}

impl SessionSnapshot {
    /// SHA-256 of the snapshot's JSON form, hex encoded.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be serialized.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(bytes)))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Derived {
    subset: Vec<EntityId>,
    distribution: Distribution,
}

/// Catalog, mask, subset and distribution held as one unit.
///
/// A session only exists after a successful load. Every mutating operation
/// either completes or leaves the previous state in place, and the active
/// subset is never empty.
#[derive(Debug, Clone)]
pub struct Session<R = StdRng> {
    attributes: DocumentSource,
    preferences: DocumentSource,
    options: LoaderOptions,
    catalog: Catalog,
    mask: Option<Mask>,
    selections: FilterSelections,
    derived: Option<Derived>,
    rng: R,
}

impl Session<StdRng> {
    /// Load a session seeded from OS entropy.
    ///
    /// # Errors
    /// Returns the loader's error when either document is unreadable or malformed.
    pub fn load(
        attributes: DocumentSource,
        preferences: DocumentSource,
        options: LoaderOptions,
    ) -> Result<Self, SelectError> {
        Self::load_with_rng(attributes, preferences, options, StdRng::from_entropy())
    }

    /// Load a session whose draws are reproducible for a given seed.
    ///
    /// # Errors
    /// Returns the loader's error when either document is unreadable or malformed.
    pub fn load_seeded(
        attributes: DocumentSource,
        preferences: DocumentSource,
        options: LoaderOptions,
        seed: u64,
    ) -> Result<Self, SelectError> {
        Self::load_with_rng(attributes, preferences, options, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Session<R> {
    /// # Errors
    /// Returns the loader's error when either document is unreadable or malformed.
    pub fn load_with_rng(
        attributes: DocumentSource,
        preferences: DocumentSource,
        options: LoaderOptions,
        rng: R,
    ) -> Result<Self, SelectError> {
        let catalog = load(&attributes, &preferences, &options)?;
        tracing::info!(entities = catalog.len(), preferences = %preferences.name(), "session ready");
        Ok(Self {
            attributes,
            preferences,
            options,
            catalog,
            mask: None,
            selections: FilterSelections::new(),
            derived: None,
            rng,
        })
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    #[must_use]
    pub fn preferences_source(&self) -> &DocumentSource {
        &self.preferences
    }

    #[must_use]
    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    /// The selections behind the current mask, as last applied.
    #[must_use]
    pub fn selections(&self) -> &FilterSelections {
        &self.selections
    }

    /// Make every entity eligible again. Recorded selections are kept so a
    /// front end can re-apply them.
    pub fn reset(&mut self) {
        self.mask = None;
        self.derived = None;
    }

    /// Reset and forget the recorded selections.
    pub fn clear_filters(&mut self) {
        self.reset();
        self.selections.clear();
    }

    /// Replace the current filters with `selections`, returning the new subset size.
    ///
    /// # Errors
    /// [`SelectError::UnknownAttributeAxis`] leaves the session untouched.
    /// [`SelectError::NoMatch`] leaves the session with all filters cleared.
    pub fn apply_filters(&mut self, selections: FilterSelections) -> Result<usize, SelectError> {
        match compose_filters(&self.catalog, &selections) {
            Ok(mask) => {
                let eligible = mask.as_ref().map_or(self.catalog.len(), Mask::selected_count);
                tracing::debug!(eligible, axes = selections.len(), "filters applied");
                self.mask = mask;
                self.selections = selections;
                self.derived = None;
                Ok(eligible)
            }
            Err(err @ SelectError::NoMatch { .. }) => {
                tracing::info!("filter combination matched nothing; filters cleared");
                self.clear_filters();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Rebuild the catalog from a new preferences document.
    ///
    /// # Errors
    /// Returns the loader's error unchanged; the session keeps its previous state.
    pub fn reload_preferences(&mut self, preferences: DocumentSource) -> Result<(), SelectError> {
        let catalog = load(&self.attributes, &preferences, &self.options)?;
        tracing::info!(
            entities = catalog.len(),
            preferences = %preferences.name(),
            "preferences reloaded"
        );
        self.catalog = catalog;
        self.preferences = preferences;
        self.clear_filters();
        Ok(())
    }

    /// Identifiers currently eligible, in catalog order.
    ///
    /// # Errors
    /// Returns [`SelectError::EmptySubset`] if the subset is empty.
    pub fn subset(&mut self) -> Result<&[EntityId], SelectError> {
        self.ensure_derived()?;
        self.derived.as_ref().map(|derived| derived.subset.as_slice()).ok_or(SelectError::EmptySubset)
    }

    /// # Errors
    /// Returns [`SelectError::EmptySubset`] if the subset is empty.
    pub fn distribution(&mut self) -> Result<&Distribution, SelectError> {
        self.ensure_derived()?;
        self.derived.as_ref().map(|derived| &derived.distribution).ok_or(SelectError::EmptySubset)
    }

    /// Eligible entities paired with their probabilities, in catalog order.
    ///
    /// # Errors
    /// Returns [`SelectError::EmptySubset`] if the subset is empty.
    pub fn active_entities(&mut self) -> Result<Vec<WeightedEntity<'_>>, SelectError> {
        self.ensure_derived()?;
        let derived = self.derived.as_ref().ok_or(SelectError::EmptySubset)?;
        Ok(derived
            .subset
            .iter()
            .zip(derived.distribution.probabilities())
            .filter_map(|(id, probability)| {
                self.catalog
                    .get(id)
                    .map(|entity| WeightedEntity { entity, probability: *probability })
            })
            .collect())
    }

    /// Draw one entity from the active subset.
    ///
    /// # Errors
    /// Returns [`SelectError::EmptySubset`] or [`SelectError::DistributionMismatch`]
    /// if the derived state is inconsistent.
    pub fn select_one(&mut self) -> Result<Selection, SelectError> {
        self.ensure_derived()?;
        let derived = self.derived.as_ref().ok_or(SelectError::EmptySubset)?;
        let id = draw(&derived.subset, &derived.distribution, &mut self.rng)?;
        let position = derived.subset.iter().position(|candidate| candidate == id);
        let probability =
            position.and_then(|position| derived.distribution.get(position)).unwrap_or_default();
        let entity = self.catalog.get(id).ok_or(SelectError::EmptySubset)?;
        tracing::debug!(id = %entity.id, probability, "entity selected");
        Ok(Selection {
            id: entity.id.clone(),
            display_name: entity.display_name(),
            display_reference: entity.display_reference.clone(),
            preference: entity.preference,
            probability,
            subset_size: derived.subset.len(),
        })
    }

    /// # Errors
    /// Returns [`SelectError::EmptySubset`] if the subset is empty.
    pub fn snapshot(&self) -> Result<SessionSnapshot, SelectError> {
        let derived = match &self.derived {
            Some(derived) => derived.clone(),
            None => self.derive()?,
        };
        Ok(SessionSnapshot {
            entities: self.catalog.entities().to_vec(),
            mask: self.mask.clone(),
            selections: self.selections.clone(),
            subset: derived.subset,
            distribution: derived.distribution,
        })
    }

    fn ensure_derived(&mut self) -> Result<(), SelectError> {
        if self.derived.is_none() {
            self.derived = Some(self.derive()?);
        }
        Ok(())
    }

    fn derive(&self) -> Result<Derived, SelectError> {
        let positions = match &self.mask {
            Some(mask) => mask.indices(),
            None => (0..self.catalog.len()).collect(),
        };
        let entities = self.catalog.entities();
        let (subset, scores): (Vec<EntityId>, Vec<f64>) = positions
            .into_iter()
            .filter_map(|position| entities.get(position))
            .map(|entity| (entity.id.clone(), entity.preference))
            .unzip();
        let distribution = softmax(&scores)?;
        tracing::debug!(subset = subset.len(), "distribution recomputed");
        Ok(Derived { subset, distribution })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MergeDirection;

    const ATTRIBUTES: &str = r#"{
        "axe": {"primary_attribute": "strength", "attack_type": "melee", "roles": ["initiator", "durable"], "image_prefix": "axe"},
        "lina": {"primary_attribute": "intelligence", "attack_type": "ranged", "roles": ["nuker", "support"], "image_prefix": "lina"},
        "drow_ranger": {"primary_attribute": "agility", "attack_type": "ranged", "roles": ["carry"], "image_prefix": "drow_ranger"},
        "sven": {"primary_attribute": "strength", "attack_type": "melee", "roles": ["carry", "initiator"], "image_prefix": "sven"}
    }"#;

    const PREFERENCES: &str = r#"{
        "axe": {"preference": 4},
        "lina": {"preference": 2},
        "drow_ranger": {"preference": 0},
        "sven": {"preference": 3}
    }"#;

    fn session() -> Session {
        match Session::load_seeded(
            DocumentSource::json("attributes.json", ATTRIBUTES),
            DocumentSource::json("preferences.json", PREFERENCES),
            LoaderOptions::default(),
            17,
        ) {
            Ok(session) => session,
            Err(err) => panic!("session should load: {err}"),
        }
    }

    fn selections(entries: &[(&str, &[&str])]) -> FilterSelections {
        entries
            .iter()
            .map(|(axis, values)| {
                ((*axis).to_string(), values.iter().map(|value| (*value).to_string()).collect())
            })
            .collect()
    }

    fn fingerprint(session: &Session) -> String {
        let snapshot = session.snapshot().unwrap_or_else(|err| panic!("snapshot: {err}"));
        snapshot.fingerprint().unwrap_or_else(|err| panic!("fingerprint: {err}"))
    }

    fn subset_ids(session: &mut Session) -> Vec<String> {
        match session.subset() {
            Ok(subset) => subset.iter().map(|id| id.to_string()).collect(),
            Err(err) => panic!("subset should be available: {err}"),
        }
    }

    #[test]
    fn fresh_session_covers_whole_catalog() {
        let mut session = session();
        assert!(session.mask().is_none());
        assert_eq!(subset_ids(&mut session), vec!["axe", "lina", "drow_ranger", "sven"]);
        let distribution = session.distribution().unwrap_or_else(|err| panic!("{err}"));
        let total: f64 = distribution.probabilities().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn filters_narrow_the_subset_and_distribution() {
        let mut session = session();
        let eligible = session
            .apply_filters(selections(&[("attack_type", &["melee"]), ("roles", &[])]))
            .unwrap_or_else(|err| panic!("filters should apply: {err}"));
        assert_eq!(eligible, 2);
        assert_eq!(subset_ids(&mut session), vec!["axe", "sven"]);

        let active = session.active_entities().unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(active.len(), 2);
        assert!(active[0].probability > active[1].probability);

        for _ in 0..50 {
            let selection = session.select_one().unwrap_or_else(|err| panic!("{err}"));
            assert!(["axe", "sven"].contains(&selection.id.as_str()));
            assert_eq!(selection.subset_size, 2);
        }
    }

    #[test]
    fn filters_replace_rather_than_accumulate() {
        let mut session = session();
        session
            .apply_filters(selections(&[("attack_type", &["melee"])]))
            .unwrap_or_else(|err| panic!("{err}"));
        session
            .apply_filters(selections(&[("attack_type", &["ranged"])]))
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(subset_ids(&mut session), vec!["lina", "drow_ranger"]);
    }

    #[test]
    fn no_match_resets_to_full_catalog() {
        let mut session = session();
        session
            .apply_filters(selections(&[("attack_type", &["melee"])]))
            .unwrap_or_else(|err| panic!("{err}"));

        let requested = selections(&[("primary_attribute", &["agility"]), ("attack_type", &["melee"])]);
        assert_eq!(
            session.apply_filters(requested.clone()),
            Err(SelectError::NoMatch { selections: requested })
        );
        assert!(session.mask().is_none());
        assert!(session.selections().is_empty());
        assert_eq!(subset_ids(&mut session).len(), session.catalog().len());
    }

    #[test]
    fn unknown_axis_leaves_state_untouched() {
        let mut session = session();
        session
            .apply_filters(selections(&[("attack_type", &["ranged"])]))
            .unwrap_or_else(|err| panic!("{err}"));
        let before = fingerprint(&session);

        assert_eq!(
            session.apply_filters(selections(&[("lane", &["mid"])])),
            Err(SelectError::UnknownAttributeAxis("lane".to_string()))
        );
        assert_eq!(fingerprint(&session), before);
    }

    #[test]
    fn reset_keeps_selections_but_clear_forgets_them() {
        let mut session = session();
        let requested = selections(&[("roles", &["carry"])]);
        session.apply_filters(requested.clone()).unwrap_or_else(|err| panic!("{err}"));

        session.reset();
        assert!(session.mask().is_none());
        assert_eq!(session.selections(), &requested);
        assert_eq!(subset_ids(&mut session).len(), 4);

        session.clear_filters();
        assert!(session.selections().is_empty());
    }

    #[test]
    fn malformed_reload_keeps_previous_state() {
        let mut session = session();
        session
            .apply_filters(selections(&[("attack_type", &["ranged"])]))
            .unwrap_or_else(|err| panic!("{err}"));
        let _ = session.distribution().unwrap_or_else(|err| panic!("{err}"));
        let before = fingerprint(&session);
        let before_catalog = session.catalog().clone();

        let result = session
            .reload_preferences(DocumentSource::json("broken.json", r#"{"axe": {"preference": "#));
        assert!(matches!(
            result,
            Err(SelectError::MalformedInput { ref document, .. }) if document == "broken.json"
        ));
        assert_eq!(fingerprint(&session), before);
        assert_eq!(session.catalog(), &before_catalog);
        assert_eq!(session.preferences_source().name(), "preferences.json");
    }

    #[test]
    fn successful_reload_replaces_catalog_and_clears_filters() {
        let mut session = session();
        session
            .apply_filters(selections(&[("attack_type", &["ranged"])]))
            .unwrap_or_else(|err| panic!("{err}"));

        session
            .reload_preferences(DocumentSource::json(
                "favourites.json",
                r#"{"axe": {"preference": 0}, "lina": {"preference": 9}}"#,
            ))
            .unwrap_or_else(|err| panic!("reload should succeed: {err}"));

        assert!(session.mask().is_none());
        assert!(session.selections().is_empty());
        let lina = session
            .catalog()
            .get(&EntityId::from("lina"))
            .unwrap_or_else(|| panic!("lina should exist"));
        assert!((lina.preference - 9.0).abs() < f64::EPSILON);
        let sven = session
            .catalog()
            .get(&EntityId::from("sven"))
            .unwrap_or_else(|| panic!("sven should exist"));
        assert!(sven.preference.abs() < f64::EPSILON);
    }

    #[test]
    fn reversed_merge_lets_preferences_restrict_the_pool() {
        let options = LoaderOptions {
            merge: MergeDirection::AttributesOverPreferences,
            ..LoaderOptions::default()
        };
        let mut session = Session::load_seeded(
            DocumentSource::json("attributes.json", ATTRIBUTES),
            DocumentSource::json("preferences.json", r#"{"lina": {"preference": 1}, "sven": {"preference": 1}}"#),
            options,
            3,
        )
        .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(subset_ids(&mut session), vec!["lina", "sven"]);
    }

    #[test]
    fn selection_carries_display_details() {
        let mut session = session();
        session
            .apply_filters(selections(&[("primary_attribute", &["agility"])]))
            .unwrap_or_else(|err| panic!("{err}"));
        let selection = session.select_one().unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(selection.id.as_str(), "drow_ranger");
        assert_eq!(selection.display_name, "Drow Ranger");
        assert_eq!(selection.display_reference, "drow_ranger");
        assert!((selection.probability - 1.0).abs() < 1e-12);
    }

    #[test]
    fn seeded_sessions_draw_the_same_sequence() {
        let mut first = session();
        let mut second = session();
        for _ in 0..20 {
            let left = first.select_one().unwrap_or_else(|err| panic!("{err}"));
            let right = second.select_one().unwrap_or_else(|err| panic!("{err}"));
            assert_eq!(left.id, right.id);
        }
    }
}
