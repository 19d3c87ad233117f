pub mod db;
pub mod error;
pub mod hooks;
pub mod materializer;
pub mod payload;
pub mod promotion;
pub mod relations;
pub mod repository;
pub mod schema;
pub mod store;
pub mod validation;

pub use error::{BrickDbError, ErrorKind, Result};
pub use hooks::{LoggingHook, PromotionEvent, PromotionHook};
pub use payload::{BrickPayload, DocumentPayload, FieldPayload, GroupPayload};
pub use promotion::{PromotionOutcome, PromotionRequest};
pub use repository::{
    DocumentRepository, DocumentTarget, Filter, ListQuery, ReadScope, VersionSelector, VersionType,
};
pub use schema::{Schema, SchemaDefinition};
pub use store::{PromotionReport, Store};
pub use validation::ValidationReport;
