//! Role synchronization between an event roster and the target platform.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::models::common::{EventoUserRef, RoleKind};
use evento_core::models::event::MappedEvent;
use evento_core::models::membership::{Membership, MembershipDelta};

use crate::target::{ContainerRoles, ObjectType, TargetSystem, ROOT_REF_ID};

/// Iteration ceiling for the upward walk through the target tree.
const MAX_PARENT_DEPTH: usize = 100;

/// A course or group above an event container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentContainer {
    pub ref_id: i64,
    pub roles: ContainerRoles,
}

impl ParentContainer {
    fn role(&self, kind: RoleKind) -> i64 {
        match kind {
            RoleKind::Admin => self.roles.admin_role_id,
            RoleKind::Member => self.roles.member_role_id,
        }
    }
}

/// A roster entry resolved to a target account.
struct Resolved {
    evento_user_id: i64,
    user_id: i64,
}

pub struct MembershipSynchronizer<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    dry_run: bool,
}

impl<R: EventoRepository, T: TargetSystem> MembershipSynchronizer<R, T> {
    /// With `dry_run` set the delta is computed but nothing is written.
    pub fn new(repo: Arc<R>, target: Arc<T>, dry_run: bool) -> Self {
        Self {
            repo,
            target,
            dry_run,
        }
    }

    /// Bring the event's admin and member roles in line with the roster.
    pub async fn synchronize(
        &self,
        event: &MappedEvent,
        admins: &[EventoUserRef],
        members: &[EventoUserRef],
    ) -> Result<MembershipDelta> {
        let parents = self.parent_chain(event.ref_id).await?;
        let mut delta = MembershipDelta::default();
        for (kind, roster) in [(RoleKind::Admin, admins), (RoleKind::Member, members)] {
            let part = self.synchronize_role(event, kind, roster, &parents).await?;
            delta.merge(part);
        }

        if !delta.is_empty() {
            info!(
                evento_id = event.evento_id,
                ref_id = event.ref_id,
                assigned = delta.assigned.len(),
                deassigned = delta.deassigned.len(),
                parent_assigned = delta.parent_assigned,
                parent_deassigned = delta.parent_deassigned,
                dry_run = self.dry_run,
                "Synchronized event memberships"
            );
        }
        Ok(delta)
    }

    /// Grant the admin role to additional administrators. Never removes anyone
    /// and leaves the synchronized baseline untouched.
    pub async fn add_event_admins(
        &self,
        event: &MappedEvent,
        admins: &[EventoUserRef],
    ) -> Result<MembershipDelta> {
        let parents = self.parent_chain(event.ref_id).await?;
        let mut delta = MembershipDelta::default();
        let resolved = self.resolve_roster(admins, &mut delta).await?;
        for user in &resolved {
            self.grant(event, RoleKind::Admin, user, &parents, &mut delta)
                .await?;
        }
        Ok(delta)
    }

    /// Courses and groups above `ref_id`, nearest first. Folders are passed
    /// through; anything else ends the walk.
    pub async fn parent_chain(&self, ref_id: i64) -> Result<Vec<ParentContainer>> {
        let mut chain = Vec::new();
        let mut next = match self.target.get_node(ref_id).await? {
            Some(node) => node.parent_ref_id,
            None => None,
        };

        for _ in 0..MAX_PARENT_DEPTH {
            let Some(parent_ref) = next.filter(|r| *r > ROOT_REF_ID) else {
                break;
            };
            let Some(node) = self.target.get_node(parent_ref).await? else {
                break;
            };
            if node.object_type.has_membership() {
                if let Some(roles) = self.target.get_container_roles(node.ref_id).await? {
                    chain.push(ParentContainer {
                        ref_id: node.ref_id,
                        roles,
                    });
                }
            } else if node.object_type != ObjectType::Folder {
                break;
            }
            next = node.parent_ref_id;
        }
        Ok(chain)
    }

    async fn synchronize_role(
        &self,
        event: &MappedEvent,
        kind: RoleKind,
        roster: &[EventoUserRef],
        parents: &[ParentContainer],
    ) -> Result<MembershipDelta> {
        let mut delta = MembershipDelta::default();
        let roster_ids: HashSet<i64> = roster.iter().map(|r| r.evento_id).collect();
        let baseline = self.repo.list_memberships(event.evento_id, kind).await?;

        // Add phase first, so a user moving between roles never loses access.
        let resolved = self.resolve_roster(roster, &mut delta).await?;
        for user in &resolved {
            self.grant(event, kind, user, parents, &mut delta).await?;

            // The Evento account was remapped to another target account since
            // the last pass; the old one loses what this event granted it.
            let stale = baseline
                .iter()
                .find(|m| m.evento_user_id == user.evento_user_id && m.user_id != user.user_id);
            if let Some(stale) = stale {
                if self.target.get_user(stale.user_id).await?.is_some() {
                    self.revoke(event, kind, stale, parents, &mut delta).await?;
                }
            }

            if !self.dry_run {
                self.repo
                    .add_membership(&Membership {
                        evento_event_id: event.evento_id,
                        evento_user_id: user.evento_user_id,
                        user_id: user.user_id,
                        role_kind: kind,
                    })
                    .await?;
            }
        }

        for gone in baseline
            .iter()
            .filter(|m| !roster_ids.contains(&m.evento_user_id))
        {
            self.revoke(event, kind, gone, parents, &mut delta).await?;
            if !self.dry_run {
                self.repo
                    .remove_membership(event.evento_id, gone.evento_user_id, kind)
                    .await?;
            }
        }
        Ok(delta)
    }

    /// Map roster entries to target accounts, dropping duplicates. Unmapped
    /// accounts are collected in `delta.unknown_members`.
    async fn resolve_roster(
        &self,
        roster: &[EventoUserRef],
        delta: &mut MembershipDelta,
    ) -> Result<Vec<Resolved>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for entry in roster {
            if !seen.insert(entry.evento_id) {
                continue;
            }
            match self.repo.get_mapped_user(entry.evento_id).await? {
                Some(user) => resolved.push(Resolved {
                    evento_user_id: entry.evento_id,
                    user_id: user.user_id,
                }),
                None => {
                    debug!(evento_user_id = entry.evento_id, "Roster entry has no mapped account");
                    delta.unknown_members.push(entry.evento_id);
                }
            }
        }
        Ok(resolved)
    }

    async fn grant(
        &self,
        event: &MappedEvent,
        kind: RoleKind,
        user: &Resolved,
        parents: &[ParentContainer],
        delta: &mut MembershipDelta,
    ) -> Result<()> {
        let held: HashSet<i64> = self
            .target
            .list_user_roles(user.user_id)
            .await?
            .into_iter()
            .collect();

        let role_id = event_role(event, kind);
        if !held.contains(&role_id) {
            if !self.dry_run {
                self.target.assign_role(role_id, user.user_id).await?;
                self.target.add_favourite(user.user_id, event.ref_id).await?;
            }
            delta.assigned.push((user.user_id, kind));
        }

        for parent in parents {
            let parent_role = parent.role(kind);
            if !held.contains(&parent_role) {
                if !self.dry_run {
                    self.target.assign_role(parent_role, user.user_id).await?;
                    self.target.add_favourite(user.user_id, parent.ref_id).await?;
                }
                delta.parent_assigned += 1;
            }
        }
        Ok(())
    }

    async fn revoke(
        &self,
        event: &MappedEvent,
        kind: RoleKind,
        gone: &Membership,
        parents: &[ParentContainer],
        delta: &mut MembershipDelta,
    ) -> Result<()> {
        let held: HashSet<i64> = self
            .target
            .list_user_roles(gone.user_id)
            .await?
            .into_iter()
            .collect();

        let role_id = event_role(event, kind);
        if held.contains(&role_id) {
            if !self.dry_run {
                self.target.deassign_role(role_id, gone.user_id).await?;
                self.target
                    .remove_favourite(gone.user_id, event.ref_id)
                    .await?;
            }
            delta.deassigned.push((gone.user_id, kind));
        }

        // Parent roles stay while a sibling group still justifies them.
        let Some(key) = event.parent_event_key.as_deref() else {
            return Ok(());
        };
        let kept_by_sibling = self
            .repo
            .has_membership_in_other_sub_event(key, event.evento_id, gone.evento_user_id, kind)
            .await?;
        if kept_by_sibling {
            return Ok(());
        }
        for parent in parents {
            let parent_role = parent.role(kind);
            if held.contains(&parent_role) {
                if !self.dry_run {
                    self.target.deassign_role(parent_role, gone.user_id).await?;
                    self.target
                        .remove_favourite(gone.user_id, parent.ref_id)
                        .await?;
                }
                delta.parent_deassigned += 1;
            }
        }
        Ok(())
    }
}

fn event_role(event: &MappedEvent, kind: RoleKind) -> i64 {
    match kind {
        RoleKind::Admin => event.admin_role_id,
        RoleKind::Member => event.member_role_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::fake::FakeTarget;
    use chrono::Utc;
    use evento_core::db::repository::{EventRepository, EventoUserRepository, MembershipRepository};
    use evento_core::db::sqlite::SqliteRepository;
    use evento_core::db::DatabasePool;
    use evento_core::models::common::AccountType;
    use evento_core::models::user::MappedUser;
    use std::collections::BTreeSet;

    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;

    async fn setup() -> (Arc<SqliteRepository>, Arc<FakeTarget>) {
        let DatabasePool::Sqlite(pool) = DatabasePool::new_sqlite_memory().await.unwrap();
        let repo = Arc::new(SqliteRepository::new(pool));
        let target = Arc::new(FakeTarget::new());
        // Evento account N maps to target user 100 + N.
        for evento_id in [A, B, C] {
            repo.upsert_mapped_user(&MappedUser {
                evento_id,
                user_id: 100 + evento_id,
                account_type: AccountType::Directory,
                last_imported: Utc::now(),
            })
            .await
            .unwrap();
            target.add_user(100 + evento_id, &format!("user{evento_id}"));
        }
        (repo, target)
    }

    fn refs(ids: &[i64]) -> Vec<EventoUserRef> {
        ids.iter()
            .map(|id| EventoUserRef {
                evento_id: *id,
                login_name: None,
            })
            .collect()
    }

    fn mapped_event(
        evento_id: i64,
        target: &FakeTarget,
        ref_id: i64,
        parent: i64,
        key: Option<&str>,
    ) -> MappedEvent {
        let object_type = if key.is_some() {
            ObjectType::Group
        } else {
            ObjectType::Course
        };
        let roles = target.add_container(ref_id, parent, object_type, "Event");
        MappedEvent {
            evento_id,
            evento_title: "Event".into(),
            ref_id,
            admin_role_id: roles.admin_role_id,
            member_role_id: roles.member_role_id,
            parent_event_key: key.map(String::from),
            auto_created: true,
            target_deleted: false,
            last_imported: Utc::now(),
        }
    }

    fn users(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().map(|id| 100 + id).collect()
    }

    #[tokio::test]
    async fn admin_roster_change_converges() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        let sync = MembershipSynchronizer::new(repo.clone(), target.clone(), false);

        sync.synchronize(&event, &refs(&[A, B]), &[]).await.unwrap();
        assert_eq!(target.holders(event.admin_role_id), users(&[A, B]));
        let calls_before = target.assign_calls();

        // C is delivered twice, as when it shows up on two feed pages.
        let delta = sync
            .synchronize(&event, &refs(&[B, C, C]), &[])
            .await
            .unwrap();

        assert_eq!(target.holders(event.admin_role_id), users(&[B, C]));
        assert_eq!(delta.assigned, vec![(100 + C, RoleKind::Admin)]);
        assert_eq!(delta.deassigned, vec![(100 + A, RoleKind::Admin)]);
        assert_eq!(target.assign_calls() - calls_before, 1);
        assert_eq!(target.deassign_calls(), 1);

        let baseline: BTreeSet<i64> = repo
            .list_memberships(42, RoleKind::Admin)
            .await
            .unwrap()
            .iter()
            .map(|m| m.evento_user_id)
            .collect();
        assert_eq!(baseline, BTreeSet::from([B, C]));
    }

    #[tokio::test]
    async fn favourites_follow_event_role() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        let sync = MembershipSynchronizer::new(repo, target.clone(), false);

        sync.synchronize(&event, &[], &refs(&[A])).await.unwrap();
        assert!(target.has_favourite(100 + A, 500));

        sync.synchronize(&event, &[], &[]).await.unwrap();
        assert!(!target.has_favourite(100 + A, 500));
        assert!(target.holders(event.member_role_id).is_empty());
    }

    #[tokio::test]
    async fn remapped_account_takes_over_the_role() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        let sync = MembershipSynchronizer::new(repo.clone(), target.clone(), false);
        sync.synchronize(&event, &[], &refs(&[A])).await.unwrap();

        // The account vanished on the target and was recreated as 201.
        target.add_user(201, "user1-new");
        repo.upsert_mapped_user(&MappedUser {
            evento_id: A,
            user_id: 201,
            account_type: AccountType::Directory,
            last_imported: Utc::now(),
        })
        .await
        .unwrap();

        sync.synchronize(&event, &[], &refs(&[A])).await.unwrap();
        assert_eq!(target.holders(event.member_role_id), BTreeSet::from([201]));
        let baseline = repo.list_memberships(42, RoleKind::Member).await.unwrap();
        assert_eq!(baseline.len(), 1);
        assert_eq!(baseline[0].user_id, 201);

        sync.synchronize(&event, &[], &[]).await.unwrap();
        assert!(target.holders(event.member_role_id).is_empty());
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        let sync = MembershipSynchronizer::new(repo, target.clone(), false);

        sync.synchronize(&event, &refs(&[A]), &refs(&[B, C]))
            .await
            .unwrap();
        let calls = target.assign_calls();
        let delta = sync
            .synchronize(&event, &refs(&[A]), &refs(&[B, C]))
            .await
            .unwrap();
        assert!(delta.is_empty());
        assert_eq!(target.assign_calls(), calls);
    }

    #[tokio::test]
    async fn users_outside_baseline_are_left_alone() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        // Granted manually on the target, never by the importer.
        target.assign(event.member_role_id, 100 + C);
        let sync = MembershipSynchronizer::new(repo, target.clone(), false);

        sync.synchronize(&event, &[], &refs(&[A])).await.unwrap();
        assert_eq!(target.holders(event.member_role_id), users(&[A, C]));
    }

    #[tokio::test]
    async fn parent_chain_skips_folders_and_stops_at_categories() {
        let (repo, target) = setup().await;
        target.add_node(10, Some(1), ObjectType::Category, "Dept");
        target.add_container(400, 10, ObjectType::Course, "Parent");
        target.add_node(450, Some(400), ObjectType::Folder, "Folder");
        let event = mapped_event(42, &target, 500, 450, Some("key"));
        let sync = MembershipSynchronizer::new(repo, target, false);

        let chain = sync.parent_chain(event.ref_id).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].ref_id, 400);
    }

    #[tokio::test]
    async fn parent_role_survives_while_sibling_justifies_it() {
        let (repo, target) = setup().await;
        let parent_roles = target.add_container(400, 1, ObjectType::Course, "Parent");
        let e1 = mapped_event(41, &target, 501, 400, Some("key"));
        let e2 = mapped_event(42, &target, 502, 400, Some("key"));
        repo.upsert_mapped_event(&e1).await.unwrap();
        repo.upsert_mapped_event(&e2).await.unwrap();
        let sync = MembershipSynchronizer::new(repo.clone(), target.clone(), false);

        sync.synchronize(&e1, &[], &refs(&[A])).await.unwrap();
        sync.synchronize(&e2, &[], &refs(&[A])).await.unwrap();
        assert!(target.holders(parent_roles.member_role_id).contains(&(100 + A)));
        assert!(target.has_favourite(100 + A, 400));

        let delta = sync.synchronize(&e1, &[], &[]).await.unwrap();
        assert_eq!(delta.deassigned.len(), 1);
        assert_eq!(delta.parent_deassigned, 0);
        assert!(!target.holders(e1.member_role_id).contains(&(100 + A)));
        assert!(target.holders(parent_roles.member_role_id).contains(&(100 + A)));

        let delta = sync.synchronize(&e2, &[], &[]).await.unwrap();
        assert_eq!(delta.parent_deassigned, 1);
        assert!(target.holders(parent_roles.member_role_id).is_empty());
        assert!(!target.has_favourite(100 + A, 400));
    }

    #[tokio::test]
    async fn unknown_members_are_reported() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        let sync = MembershipSynchronizer::new(repo, target.clone(), false);

        let delta = sync
            .synchronize(&event, &[], &refs(&[A, 99]))
            .await
            .unwrap();
        assert_eq!(delta.unknown_members, vec![99]);
        assert_eq!(target.holders(event.member_role_id), users(&[A]));
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        let sync = MembershipSynchronizer::new(repo.clone(), target.clone(), true);

        let delta = sync.synchronize(&event, &refs(&[A]), &[]).await.unwrap();
        assert_eq!(delta.assigned.len(), 1);
        assert_eq!(target.assign_calls(), 0);
        assert!(repo
            .list_memberships(42, RoleKind::Admin)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn event_admins_are_added_without_baseline() {
        let (repo, target) = setup().await;
        let event = mapped_event(42, &target, 500, 1, None);
        target.assign(event.admin_role_id, 100 + B);
        let sync = MembershipSynchronizer::new(repo.clone(), target.clone(), false);

        let delta = sync.add_event_admins(&event, &refs(&[A])).await.unwrap();
        assert_eq!(delta.assigned, vec![(100 + A, RoleKind::Admin)]);
        assert_eq!(target.holders(event.admin_role_id), users(&[A, B]));
        assert!(repo
            .list_memberships(42, RoleKind::Admin)
            .await
            .unwrap()
            .is_empty());
    }
}
