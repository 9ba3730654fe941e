//! Access control.
//!
//! # Components
//!
//! - `permission` - resource types, access levels and permission tuples
//! - `requirement` - route requirements and decisions
//! - `policy` - the layered evaluator and role table

pub mod permission;
pub mod policy;
pub mod requirement;

pub use permission::{AccessLevel, Permission, ResourceType};
pub use policy::{authorize, check_permission, role_permissions};
pub use requirement::{AuthDecision, MatchedPolicy, Requirement};
