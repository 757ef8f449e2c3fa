/*!
Tests for type-tag dispatch in the protected entity manager.
*/

mod common;

use common::{mem_id, MemoryTypeManager, Node, MEM_TYPE};
use custodian_core::{
    Context, CustodianError, ManagerConfig, ProtectedEntityId, ProtectedEntityManager,
};

fn two_type_manager() -> ProtectedEntityManager {
    ProtectedEntityManager::builder()
        .register(Box::new(
            MemoryTypeManager::named("vol").node("disk-1", Node::with_data(b"blocks")),
        ))
        .unwrap()
        .register(Box::new(
            MemoryTypeManager::new().node("alpha", Node::with_data(b"alpha")),
        ))
        .unwrap()
        .build()
}

#[test]
fn test_dispatches_on_type_tag() {
    let manager = two_type_manager();
    let ctx = Context::new();

    let alpha = manager.get_protected_entity(&ctx, &mem_id("alpha")).unwrap();
    assert_eq!(alpha.id(), &mem_id("alpha"));
    assert_eq!(alpha.info(&ctx).unwrap().size(), 5);

    let disk_id: ProtectedEntityId = "vol:disk-1".parse().unwrap();
    let disk = manager.get_protected_entity(&ctx, &disk_id).unwrap();
    assert_eq!(disk.id().pe_type(), "vol");
}

#[test]
fn test_unknown_type_is_reported() {
    let manager = two_type_manager();
    let id: ProtectedEntityId = "k8s:ns-prod".parse().unwrap();

    let result = manager.get_protected_entity(&Context::new(), &id);
    assert!(matches!(
        result,
        Err(CustodianError::UnknownEntityType(ref t)) if t == "k8s"
    ));
}

#[test]
fn test_known_type_missing_entity_is_not_found() {
    let manager = two_type_manager();
    let result = manager.get_protected_entity(&Context::new(), &mem_id("beta"));
    assert!(matches!(result, Err(CustodianError::EntityNotFound { .. })));
}

#[test]
fn test_type_managers_listed_in_name_order() {
    let manager = two_type_manager();
    let types: Vec<&str> = manager
        .list_entity_type_managers()
        .into_iter()
        .map(|tm| tm.type_name())
        .collect();
    assert_eq!(types, vec![MEM_TYPE, "vol"]);
    assert!(manager.get_type_manager("vol").is_some());
    assert!(manager.get_type_manager("nope").is_none());
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let result = ProtectedEntityManager::builder()
        .register(Box::new(MemoryTypeManager::new()))
        .unwrap()
        .register(Box::new(MemoryTypeManager::new()));
    assert!(matches!(result, Err(CustodianError::Config(_))));
}

#[test]
fn test_cancelled_context_short_circuits_lookup() {
    let manager = two_type_manager();
    let ctx = Context::new();
    ctx.cancel();

    let result = manager.get_protected_entity(&ctx, &mem_id("alpha"));
    assert!(matches!(result, Err(CustodianError::Cancelled)));
}

#[test]
fn test_empty_config_builds_empty_manager() {
    let manager = ProtectedEntityManager::from_config(&ManagerConfig::default()).unwrap();
    assert!(manager.list_entity_type_managers().is_empty());
}
