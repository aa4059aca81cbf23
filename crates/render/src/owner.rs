//! Controller owner references, so the store garbage-collects dependents with their client.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("owner {0} has no uid yet")]
    MissingOwnerIdentity(String),
    #[error("object {object} is already controlled by {kind}/{name}")]
    AlreadyOwned { object: String, kind: String, name: String },
}

/// The controller owner reference of `meta`, if any.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references.as_ref()?.iter().find(|o| o.controller == Some(true))
}

/// Controller reference for `owner`. Fails when the owner has not been persisted yet.
pub fn owner_ref<K: kube::Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference, OwnershipError> {
    owner
        .controller_owner_ref(&())
        .ok_or_else(|| OwnershipError::MissingOwnerIdentity(owner.meta().name.clone().unwrap_or_default()))
}

/// Make `owner` the controller of `meta`.
///
/// A reference with the same uid is refreshed in place; a different controller is an error.
pub fn set_controller_owner(meta: &mut ObjectMeta, owner: OwnerReference) -> Result<(), OwnershipError> {
    if let Some(existing) = controller_of(meta) {
        if existing.uid != owner.uid {
            return Err(OwnershipError::AlreadyOwned {
                object: meta.name.clone().unwrap_or_default(),
                kind: existing.kind.clone(),
                name: existing.name.clone(),
            });
        }
    }
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    match refs.iter_mut().find(|o| o.uid == owner.uid) {
        Some(slot) => *slot = owner,
        None => refs.push(owner),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oref(uid: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: "frpo.io/v1alpha1".into(),
            kind: "Client".into(),
            name: name.into(),
            uid: uid.into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn sets_and_refreshes_same_owner() {
        let mut meta = ObjectMeta { name: Some("edge".into()), ..ObjectMeta::default() };
        set_controller_owner(&mut meta, oref("u1", "edge")).expect("first");
        set_controller_owner(&mut meta, oref("u1", "edge")).expect("again");
        assert_eq!(meta.owner_references.as_ref().map(Vec::len), Some(1));
        assert_eq!(controller_of(&meta).map(|o| o.uid.as_str()), Some("u1"));
    }

    #[test]
    fn rejects_second_controller() {
        let mut meta = ObjectMeta { name: Some("edge".into()), ..ObjectMeta::default() };
        set_controller_owner(&mut meta, oref("u1", "edge")).expect("first");
        let err = set_controller_owner(&mut meta, oref("u2", "other")).unwrap_err();
        assert!(matches!(err, OwnershipError::AlreadyOwned { ref name, .. } if name == "edge"), "{err}");
    }

    #[test]
    fn non_controller_refs_are_kept() {
        let mut plain = oref("u0", "holder");
        plain.controller = None;
        let mut meta = ObjectMeta { owner_references: Some(vec![plain]), ..ObjectMeta::default() };
        set_controller_owner(&mut meta, oref("u1", "edge")).expect("set");
        assert_eq!(meta.owner_references.as_ref().map(Vec::len), Some(2));
    }
}
