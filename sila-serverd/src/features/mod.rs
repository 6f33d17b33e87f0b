pub mod registry;

pub use registry::{FeatureRecord, FeatureRegistry};

/// Definition of the SiLAService feature, shipped with the binary
pub const SILA_SERVICE_DEFINITION: &str = include_str!("../../definitions/SiLAService.sila.xml");

/// Definition of the SimulationController feature, shipped with the binary
pub const SIMULATION_CONTROLLER_DEFINITION: &str =
    include_str!("../../definitions/SimulationController.sila.xml");
