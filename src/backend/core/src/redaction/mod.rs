//! Output redaction.
//!
//! - **Node**: the closed payload tree (`Null`, `Scalar`, `Sequence`,
//!   `Mapping`), JSON conversion and schema field tags
//! - **Filter**: removes financial fields for roles without financial access

pub mod filter;
pub mod node;

pub use filter::FieldRedactionFilter;
pub use node::{Entry, FieldSchema, FieldTag, Node, Scalar};
