use super::*;

const VARS: [&str; 9] = [
    "ROCKY_NAMESPACE",
    "ROCKY_ROUTER_URL",
    "ROCKY_PROFILE",
    "ROCKY_ACCESS_KEY",
    "ROCKY_INSTANCE_ID",
    "ROCKY_INSTANCE_IP",
    "ROCKY_INSTANCE_PORT",
    "ROCKY_MODULES",
    "ROCKY_HEARTBEAT_SECS",
];

/// # Safety
/// Tests must run with `--test-threads=1` to avoid env races.
unsafe fn clear_rocky_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn from_env_requires_namespace_then_applies_overrides() {
    unsafe { clear_rocky_env() };
    assert!(matches!(
        ClientConfig::from_env(),
        Err(ClientError::Config { var: "ROCKY_NAMESPACE", .. })
    ));

    unsafe {
        std::env::set_var("ROCKY_NAMESPACE", "ns1");
        std::env::set_var("ROCKY_INSTANCE_ID", "i1");
        std::env::set_var("ROCKY_INSTANCE_PORT", "9001");
        std::env::set_var("ROCKY_MODULES", "orders, ,billing");
        std::env::set_var("ROCKY_ROUTER_URL", "http://10.0.0.5:9400/");
    }
    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.namespace, "ns1");
    assert_eq!(cfg.profile, DEFAULT_PROFILE);
    assert_eq!(cfg.instance_id, "i1");
    assert_eq!(cfg.instance_port, 9001);
    assert_eq!(cfg.modules, vec!["orders".to_owned(), "billing".to_owned()]);
    assert_eq!(cfg.heartbeat, DEFAULT_HEARTBEAT);
    assert_eq!(cfg.routers_url(), "http://10.0.0.5:9400/rocky/routers");

    unsafe { clear_rocky_env() };
}

#[test]
fn from_env_rejects_bad_port() {
    unsafe {
        clear_rocky_env();
        std::env::set_var("ROCKY_NAMESPACE", "ns1");
        std::env::set_var("ROCKY_INSTANCE_PORT", "not-a-port");
    }
    let err = ClientConfig::from_env().unwrap_err();
    assert!(matches!(err, ClientError::Config { var: "ROCKY_INSTANCE_PORT", .. }));
    unsafe { clear_rocky_env() };
}

#[test]
fn from_env_rejects_zero_heartbeat() {
    unsafe {
        clear_rocky_env();
        std::env::set_var("ROCKY_NAMESPACE", "ns1");
        std::env::set_var("ROCKY_HEARTBEAT_SECS", "0");
    }
    let err = ClientConfig::from_env().unwrap_err();
    assert!(matches!(err, ClientError::Config { var: "ROCKY_HEARTBEAT_SECS", ref value } if value == "0"));

    unsafe { std::env::set_var("ROCKY_HEARTBEAT_SECS", "2") };
    assert_eq!(ClientConfig::from_env().unwrap().heartbeat, Duration::from_secs(2));
    unsafe { clear_rocky_env() };
}

#[test]
fn new_generates_distinct_instance_ids() {
    let a = ClientConfig::new("ns1");
    let b = ClientConfig::new("ns1");
    assert_ne!(a.instance_id, b.instance_id);
    assert_eq!(a.instance_ip, DEFAULT_INSTANCE_IP);
}

#[test]
fn service_info_carries_identity() {
    let mut cfg = ClientConfig::new("ns1");
    cfg.instance_id = "i1".into();
    cfg.instance_port = 9002;
    cfg.access_key = "secret".into();
    cfg.modules = vec!["orders".into()];

    let info = cfg.service_info();
    assert_eq!(info.namespace, "ns1");
    assert_eq!(info.instance_id, "i1");
    assert_eq!(info.port, 9002);
    assert_eq!(info.access_key, "secret");
    assert_eq!(info.modules, vec!["orders".to_owned()]);
}
