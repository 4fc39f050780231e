pub mod permissions;

pub use permissions::{PermissionResolver, PermissionView};
