pub mod resource_service;
pub mod session_cache;

pub use resource_service::{ListParams, ListResult, ResourceService};
pub use session_cache::{IdentityProvider, SessionCache, StaticIdentity};
