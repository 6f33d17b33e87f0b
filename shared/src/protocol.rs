/// DNS-SD service type every SiLA2 server advertises under
pub const SILA_SERVICE_TYPE: &str = "_sila._tcp.local.";

/// First port tried when no port is requested or the requested one is taken
pub const DEFAULT_BASE_PORT: u16 = 55001;

/// SiLA protocol version published in the advertisement
pub const SILA_PROTOCOL_VERSION: &str = "1.0";

/// TXT record keys used in server advertisement
pub const TXT_VERSION: &str = "version";
pub const TXT_SERVER_NAME: &str = "server_name";
pub const TXT_DESCRIPTION: &str = "description";

/// Identifiers of the features every server implements
pub const SILA_SERVICE_FEATURE: &str = "SiLAService";
pub const SIMULATION_CONTROLLER_FEATURE: &str = "SimulationController";

/// RPC path prefixes for the built-in features
pub const SILA_SERVICE_PATH: &str = "/SiLAService";
pub const SIMULATION_CONTROLLER_PATH: &str = "/SimulationController";
