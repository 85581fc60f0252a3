//! Shared constants for testkit components.

/// Default swarm listen address passed to init and join
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2377";

/// Default engine API port on provisioned hosts
pub const DEFAULT_ENGINE_PORT: u16 = 2376;

/// Default scoping namespace for provisioned resources
pub const DEFAULT_NAMESPACE: &str = "testkit";

/// Default provider key used by `create`
pub const DEFAULT_PROVIDER: &str = "static/host-pool";

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "testkit.yaml";

/// Control channel validation attempts before a machine is given up on
pub const DEFAULT_VALIDATION_ATTEMPTS: u32 = 10;

/// Seconds between control channel validation attempts
pub const DEFAULT_VALIDATION_INTERVAL_SECS: u64 = 3;

/// Seconds between join attempts when join retries are enabled
pub const DEFAULT_JOIN_RETRY_INTERVAL_SECS: u64 = 5;

/// Instance tag keys
pub mod tags {
    /// Scoping label: testkit.scope={namespace}
    pub const SCOPE: &str = "testkit.scope";

    /// Platform label: testkit.platform={linux|windows}
    pub const PLATFORM: &str = "testkit.platform";

    /// Position within the requested platform set
    pub const INDEX: &str = "testkit.index";
}

/// Environment variables emitted for each machine
pub mod env {
    pub const DOCKER_HOST: &str = "DOCKER_HOST";
    pub const DOCKER_TLS_VERIFY: &str = "DOCKER_TLS_VERIFY";
    pub const DOCKER_CERT_PATH: &str = "DOCKER_CERT_PATH";
}
