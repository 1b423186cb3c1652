//! Store-scoped and platform-scoped authorization.

pub mod permissions;
pub mod policy;
pub mod resolver;

pub use permissions::{Permission, PlatformRole, StoreRole};
pub use policy::{AuthorizationEngine, Policy};
pub use resolver::{Principal, TenancyContext, TenancyResolver};
