//! Corral Connect: connectivity from the fleet manager to remote controllers
//!
//! # Architecture
//!
//! - **ConnectionCache**: one physical connection per controller, shared by
//!   every caller through reference-counted [`CachedConn`] handles, with
//!   concurrent opens for the same key collapsed into a single dial
//! - **Dialer**: the seam that turns a [`DialTarget`] into a live
//!   [`ControllerApi`](corral_core_interface::ControllerApi)
//! - **testing**: in-memory controllers and a dialer for exercising the above
//!
//! # Example
//!
//! ```rust,no_run
//! use corral_connect::{ControllerCache, DialTarget, Dialer};
//!
//! async fn version(cache: &ControllerCache, dialer: &dyn Dialer, target: DialTarget)
//!     -> Result<(), corral_connect::ConnectError>
//! {
//!     let key = target.controller.to_string();
//!     let conn = cache.open_api(&key, || dialer.dial(&target)).await?;
//!     let v = conn.server_version().await?;
//!     println!("{key} runs {v}");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod dialer;
pub mod error;
pub mod testing;

pub use cache::{CachedConn, Connection, ConnectionCache, ControllerCache, ControllerConn};
pub use dialer::{DialTarget, Dialer};
pub use error::ConnectError;
