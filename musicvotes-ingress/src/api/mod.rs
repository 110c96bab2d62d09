//! HTTP API handlers for musicvotes-ingress

pub mod health;
pub mod ingress;

pub use health::health_routes;
pub use ingress::ingress_routes;
