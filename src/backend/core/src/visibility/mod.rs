//! Record visibility.
//!
//! - **Predicate**: boolean expression tree over record fields, evaluable in
//!   memory and renderable to SQL
//! - **Record**: the [`VisibilityRecord`] trait and the `Project`/`Task` shapes
//! - **Policy**: builds the per-context predicate and filters candidate sets

pub mod policy;
pub mod predicate;
pub mod record;

pub use policy::VisibilityPolicy;
pub use predicate::{Field, Predicate, Relation, RelationMapping, SqlFragment, SqlMapping};
pub use record::{Project, Task, VisibilityRecord};
