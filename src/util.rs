use sysinfo::System;

const HOST_ID: &str = "PULSEWATCH_HOST_ID";

const DEFAULT_HOST_ID: &str = "localhost";

/// Host id from the environment, if set and non-empty
pub fn get_host_id_from_env() -> Option<String> {
    std::env::var(HOST_ID).ok().filter(|id| !id.trim().is_empty())
}

/// Resolve the host id stamped on samples
///
/// The environment wins over the config file; the OS hostname is the fallback.
pub fn resolve_host_id(configured: Option<&str>) -> String {
    get_host_id_from_env()
        .or_else(|| configured.map(str::to_string))
        .or_else(System::host_name)
        .unwrap_or_else(|| DEFAULT_HOST_ID.to_string())
}
