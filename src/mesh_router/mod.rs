//! Mesh router: route selection (direct / bus / local) with strict fallback.

mod config;
mod router;

pub use config::{ConfigError, RouterConfig, RouterConfigBuilder};
pub use router::{MeshRouter, Route, RouteError, RoutePreference, RouteRecord, RouteResult, RouteStatus};
