//! Selection engine: merge entity attributes with user preferences, narrow the
//! pool with attribute filters, and draw one entity with softmax-weighted odds.

pub mod catalog;
pub mod document;
pub mod error;
pub mod filter;
pub mod probability;
pub mod selector;
pub mod session;

pub use catalog::{
    display_name, load, AttributeValue, Catalog, Entity, EntityId, LoaderOptions, MergeDirection,
    DEFAULT_DISPLAY_FIELD, PREFERENCE_FIELD,
};
pub use document::{DocumentFormat, DocumentSource};
pub use error::SelectError;
pub use filter::{
    build_mask, combine, compose_filters, FilterAxis, FilterDefinitions, FilterSelections, Mask,
};
pub use probability::{softmax, Distribution};
pub use selector::{draw, draw_position};
pub use session::{Selection, Session, SessionSnapshot, WeightedEntity};
