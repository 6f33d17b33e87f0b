//! SiLA2 server core: feature registry, identity, simulation control,
//! RPC transport and DNS-SD advertisement.

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod identity;
pub mod mdns;
pub mod server;
pub mod simulation;
pub mod store;
pub mod transport;

pub use error::{NotFoundError, PortError, ServerError};
pub use features::FeatureRegistry;
pub use identity::{IdentityService, ServerIdentity};
pub use server::{FeatureHandler, ServerOptions, SilaServer};
pub use simulation::{ModeSwitch, SimulationCoordinator, SimulationMode, TransitionReport};
