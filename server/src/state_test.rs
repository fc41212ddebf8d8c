use super::*;

#[tokio::test]
async fn test_app_state_shares_hub_and_registry_across_clones() {
    let (state, _store) = test_helpers::test_app_state(&["k1"]).await;
    let clone = state.clone();

    assert!(Arc::ptr_eq(&state.hub, &clone.hub));
    assert!(Arc::ptr_eq(&state.registry, &clone.registry));
    assert!(clone.config.accepts_key("k1"));
    assert!(!clone.config.accepts_key("k2"));
}
