//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tower-http layers)
//!     → middleware/ (harden → deadline → inspect → route guard)
//!         → request.rs (client address, InspectRequest, JSON body capture)
//!         → response.rs (generic denial bodies)
//!     → server.rs forward handler → upstream
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{guard_route, protect, protect_with_deadline};
pub use request::ClientIp;
pub use server::{ServerError, ShieldServer};
