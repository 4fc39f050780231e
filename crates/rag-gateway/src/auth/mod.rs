pub mod gate;
pub mod middleware;

pub use gate::{AuthUser, SessionGate};
pub use middleware::CurrentUser;
