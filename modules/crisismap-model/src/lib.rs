pub mod audit;
pub mod authorization;
pub mod cache;
pub mod catalog;
pub mod deps;
pub mod domains;
pub mod error;
pub mod maps;
pub mod perms;
pub mod redirect;
pub mod reports;
pub mod votes;

pub use audit::AuditEventType;
pub use authorization::NewAuthorization;
pub use cache::Cache;
pub use catalog::CatalogEntry;
pub use deps::{Caches, ModelDeps};
pub use domains::Domain;
pub use error::{ModelError, ModelResult};
pub use maps::{Map, MapPermissions, MapVersion};
pub use perms::{Access, Target};
pub use reports::{NewCrowdReport, ReportFilter};
pub use votes::CrowdVote;
