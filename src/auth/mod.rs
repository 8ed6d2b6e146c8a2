pub mod guard;
pub mod identity;
pub mod role;
pub mod session;

pub use guard::*;
pub use identity::*;
pub use role::*;
pub use session::*;
