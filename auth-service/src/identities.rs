//! Platform-reserved identities

pub const CONFIG_STORE: &str = "config.store";
pub const AUTH: &str = "platform.auth";
pub const CONTROL_CONNECTION: &str = "control.connection";
pub const PLATFORM_CONTROL: &str = "platform.control";
pub const PLATFORM: &str = "platform";
pub const PLATFORM_HEALTH: &str = "platform.health";

pub const RESERVED: [&str; 6] = [
    CONFIG_STORE,
    AUTH,
    CONTROL_CONNECTION,
    PLATFORM_CONTROL,
    PLATFORM,
    PLATFORM_HEALTH,
];

/// Method every agent exposes to receive a new protected RPC set
pub const ADD_PROTECTED_RPCS: &str = "rpc.add_protected_rpcs";

pub fn reserved_identities() -> Vec<String> {
    RESERVED.iter().map(|identity| identity.to_string()).collect()
}
