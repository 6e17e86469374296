//! Api clients are machines, identified by the key they send with every
//! request. There is no session and no password.

mod middleware;
pub use middleware::*;
