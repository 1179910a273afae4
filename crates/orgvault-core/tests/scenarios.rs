//! End-to-end behaviour of the core stores wired together over a memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::Duration;
use orgvault_core::error::ErrorKind;
use orgvault_core::{
    Argon2Hasher, AuthSession, CredentialPatch, CredentialVault, DivisionId, HierarchyStore,
    IdentityStore, JwtSigner, LoginRequest, MembershipGrant, NewCredential, OuId, Role, Secret,
    SecretHasher, TokenSigner, User, role,
};
use orgvault_storage::{MemoryBackend, StorageBackend};

struct System {
    hierarchy: Arc<HierarchyStore>,
    identity: Arc<IdentityStore>,
    session: AuthSession,
    vault: CredentialVault,
}

fn system() -> System {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let hasher: Arc<dyn SecretHasher> =
        Arc::new(Argon2Hasher::with_params(8, 1, 1, None).expect("params"));
    let signer: Arc<dyn TokenSigner> =
        Arc::new(JwtSigner::new(b"scenario-signing-key", Duration::hours(1)));
    let hierarchy = Arc::new(HierarchyStore::new(Arc::clone(&backend)));
    let identity = Arc::new(IdentityStore::new(
        Arc::clone(&backend),
        Arc::clone(&hierarchy),
        Arc::clone(&hasher),
    ));
    let session = AuthSession::new(Arc::clone(&identity), Arc::clone(&hasher), signer);
    let vault = CredentialVault::new(backend, Arc::clone(&hierarchy), hasher);
    System {
        hierarchy,
        identity,
        session,
        vault,
    }
}

async fn ops_and_infra(sys: &System) -> (OuId, DivisionId) {
    let ops = sys.hierarchy.create_ou("Ops", "Operations").await.unwrap();
    let infra = sys
        .hierarchy
        .create_division("Infra", "Infrastructure", ops.id)
        .await
        .unwrap();
    (ops.id, infra.id)
}

async fn register(sys: &System, name: &str, ou: OuId, division: DivisionId) -> User {
    sys.identity
        .register(name, &Secret::from(format!("{name}-pw")), ou, division)
        .await
        .unwrap()
}

fn credential(division: DivisionId, ou: OuId) -> NewCredential {
    NewCredential {
        username: "db-admin".to_owned(),
        secret: Secret::from("hunter2"),
        service: "postgres".to_owned(),
        division,
        ou,
    }
}

#[tokio::test]
async fn scenario_a_login_token_carries_memberships() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    register(&sys, "alice", ops, infra).await;

    let session = sys
        .session
        .login(&LoginRequest {
            username: "alice".to_owned(),
            secret: Secret::from("alice-pw"),
            division: None,
        })
        .await
        .unwrap();

    let claims = sys.session.verify(&session.token).unwrap();
    assert!(claims.divisions.contains(&infra));
    assert_eq!(claims.ou, ops);
    assert_eq!(claims.role, Role::Normal);
}

#[tokio::test]
async fn scenario_b_member_adds_credential() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let alice = register(&sys, "alice", ops, infra).await;

    let added = sys.vault.add(&alice, credential(infra, ops)).await.unwrap();

    let division = sys.hierarchy.get_division(infra).await.unwrap();
    let ou = sys.hierarchy.get_ou(ops).await.unwrap();
    assert!(division.credentials.contains(&added.id));
    assert!(ou.credentials.contains(&added.id));
}

#[tokio::test]
async fn scenario_c_non_member_is_forbidden() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let web = sys.hierarchy.create_division("Web", "", ops).await.unwrap();
    let alice = register(&sys, "alice", ops, infra).await;

    let err = sys.vault.add(&alice, credential(web.id, ops)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn scenario_d_role_change_unlocks_update() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let alice = register(&sys, "alice", ops, infra).await;
    let bob = register(&sys, "bob", ops, infra).await;
    let added = sys.vault.add(&alice, credential(infra, ops)).await.unwrap();

    // alice's token predates the role change; the fresh record is what counts.
    let token = sys
        .session
        .login(&LoginRequest {
            username: "alice".to_owned(),
            secret: Secret::from("alice-pw"),
            division: None,
        })
        .await
        .unwrap()
        .token;
    sys.identity.set_role("alice", Role::Management).await.unwrap();
    let alice = sys.session.authenticate(&token).await.unwrap();

    let patch = CredentialPatch {
        service: Some("postgres-replica".to_owned()),
        ..CredentialPatch::default()
    };
    let updated = sys.vault.update(&alice, added.id, patch.clone()).await.unwrap();
    assert_eq!(updated.service, "postgres-replica");

    let err = sys.vault.update(&bob, added.id, patch).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[test]
fn role_order_is_total() {
    for (i, lower) in Role::ALL.iter().enumerate() {
        for higher in &Role::ALL[i..] {
            assert!(role::permits(*higher, *lower), "{higher} should satisfy {lower}");
        }
    }
    assert!(!role::permits(Role::Normal, Role::Management));
    assert!(!role::permits(Role::Management, Role::Admin));
}

#[tokio::test]
async fn division_login_requires_membership_and_matching_secret() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let web = sys.hierarchy.create_division("Web", "", ops).await.unwrap().id;
    register(&sys, "alice", ops, infra).await;
    sys.identity
        .assign_memberships(
            "alice",
            &[
                MembershipGrant::retain(infra),
                MembershipGrant::new(web, "web-secret"),
            ],
            ops,
        )
        .await
        .unwrap();

    let attempt = |division: DivisionId, secret: &str| LoginRequest {
        username: "alice".to_owned(),
        secret: Secret::from(secret),
        division: Some(division),
    };

    assert!(sys.session.login(&attempt(web, "web-secret")).await.is_ok());
    assert!(sys.session.login(&attempt(infra, "alice-pw")).await.is_ok());

    for bad in [
        attempt(web, "alice-pw"),
        attempt(infra, "web-secret"),
        attempt(DivisionId::new(), "web-secret"),
    ] {
        let err = sys.session.login(&bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}

#[tokio::test]
async fn assignment_is_atomic_or_rejected() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let web = sys.hierarchy.create_division("Web", "", ops).await.unwrap().id;
    let before = register(&sys, "alice", ops, infra).await;

    let err = sys
        .identity
        .assign_memberships(
            "alice",
            &[
                MembershipGrant::new(web, "w"),
                MembershipGrant::new(DivisionId::new(), "ghost"),
            ],
            ops,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let after = sys.identity.get_user(before.id).await.unwrap();
    assert_eq!(after.divisions, before.divisions);
    assert_eq!(after.division_secrets, before.division_secrets);
}

#[tokio::test]
async fn add_never_succeeds_outside_membership() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let web = sys.hierarchy.create_division("Web", "", ops).await.unwrap().id;
    let alice = register(&sys, "alice", ops, infra).await;

    for ou in [ops, OuId::new()] {
        let err = sys.vault.add(&alice, credential(web, ou)).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Forbidden | ErrorKind::NotFound));
    }
    assert!(sys.vault.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn re_adding_a_credential_reference_does_not_duplicate() {
    let sys = system();
    let (ops, infra) = ops_and_infra(&sys).await;
    let alice = register(&sys, "alice", ops, infra).await;
    let added = sys.vault.add(&alice, credential(infra, ops)).await.unwrap();

    sys.hierarchy
        .attach_credential(infra, ops, added.id)
        .await
        .unwrap();
    sys.hierarchy
        .attach_credential(infra, ops, added.id)
        .await
        .unwrap();

    let division = sys.hierarchy.get_division(infra).await.unwrap();
    let ou = sys.hierarchy.get_ou(ops).await.unwrap();
    assert_eq!(division.credentials.len(), 1);
    assert_eq!(ou.credentials.len(), 1);
    assert_eq!(
        sys.vault.list_for_division(infra, None).await.unwrap().len(),
        1
    );
}
