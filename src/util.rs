use mac_address::get_mac_address;

/// Upper-case hex MAC of the primary interface, or "unknown".
pub fn get_device_mac() -> String {
    get_mac_address()
        .ok()
        .flatten()
        .map(|addr| normalize_mac(&addr.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn normalize_mac(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Configured vehicle id, falling back to the device MAC.
pub fn resolve_vehicle_id(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        get_device_mac()
    } else {
        configured.to_string()
    }
}
