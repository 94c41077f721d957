//! Decision state machine for event records.
//!
//! The lookups that feed a decision are gathered into [`EventFacts`] first;
//! [`decide`] and [`decide_delete`] are then pure functions of the record and
//! those facts, so deciding twice on unchanged state yields the same action.

use std::sync::Arc;

use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::models::event::{EventoEvent, MappedEvent, ParentEvent};

use crate::location::LocationResolver;
use crate::target::TargetSystem;

/// Result of looking up the parent event of a multi-group record.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentLookup {
    NotFound,
    Found(ParentEvent),
    /// A parent matched by key or title belongs to another Evento group.
    Collision(ParentEvent),
}

/// Everything [`decide`] needs to know about the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFacts {
    pub mapped: Option<MappedEvent>,
    /// The mapped target object exists and is not in the trash.
    pub target_exists: bool,
    /// Resolved destination category, if the classification is configured.
    pub destination_ref_id: Option<i64>,
    pub parent: ParentLookup,
    /// Unmapped target objects whose title equals the event title.
    pub title_candidates: Vec<i64>,
}

/// The single corrective action decided for one event record.
#[derive(Debug, Clone, PartialEq)]
pub enum EventAction {
    ConvertSingleToMultiGroup {
        mapped: MappedEvent,
        parent: Option<ParentEvent>,
    },
    UnmarkDeletedObject {
        mapped: MappedEvent,
    },
    UpdateExistingEvent {
        mapped: MappedEvent,
    },
    CreateSingleEvent {
        destination_ref_id: i64,
    },
    CreateEventInParentEvent {
        parent: ParentEvent,
    },
    CreateEventWithNewParent {
        destination_ref_id: i64,
    },
    AdoptExistingObjectAsEvent {
        ref_id: i64,
    },
    ReportUnknownLocation,
    ReportNonImportedEvent {
        candidates: Vec<i64>,
    },
    ReportGroupKeyCollision {
        parent: ParentEvent,
    },
}

impl EventAction {
    pub fn kind(&self) -> &'static str {
        match self {
            EventAction::ConvertSingleToMultiGroup { .. } => "convert_single_to_multi_group",
            EventAction::UnmarkDeletedObject { .. } => "unmark_deleted_object",
            EventAction::UpdateExistingEvent { .. } => "update_existing_event",
            EventAction::CreateSingleEvent { .. } => "create_single_event",
            EventAction::CreateEventInParentEvent { .. } => "create_event_in_parent_event",
            EventAction::CreateEventWithNewParent { .. } => "create_event_with_new_parent",
            EventAction::AdoptExistingObjectAsEvent { .. } => "adopt_existing_object_as_event",
            EventAction::ReportUnknownLocation => "report_unknown_location",
            EventAction::ReportNonImportedEvent { .. } => "report_non_imported_event",
            EventAction::ReportGroupKeyCollision { .. } => "report_group_key_collision",
        }
    }
}

/// Action for a mapped event that is no longer delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDeleteAction {
    UnlinkManualObject { mapped: MappedEvent },
    DeleteGroupWithParent { mapped: MappedEvent, parent: ParentEvent },
    DeleteGroupKeepParent { mapped: MappedEvent },
    DeleteSingleEvent { mapped: MappedEvent },
}

impl EventDeleteAction {
    pub fn kind(&self) -> &'static str {
        match self {
            EventDeleteAction::UnlinkManualObject { .. } => "unlink_manual_object",
            EventDeleteAction::DeleteGroupWithParent { .. } => "delete_group_with_parent",
            EventDeleteAction::DeleteGroupKeepParent { .. } => "delete_group_keep_parent",
            EventDeleteAction::DeleteSingleEvent { .. } => "delete_single_event",
        }
    }

    pub fn mapped(&self) -> &MappedEvent {
        match self {
            EventDeleteAction::UnlinkManualObject { mapped }
            | EventDeleteAction::DeleteGroupWithParent { mapped, .. }
            | EventDeleteAction::DeleteGroupKeepParent { mapped }
            | EventDeleteAction::DeleteSingleEvent { mapped } => mapped,
        }
    }
}

/// Decide the action for an event record.
pub fn decide(event: &EventoEvent, facts: &EventFacts) -> EventAction {
    if let Some(mapped) = &facts.mapped {
        if mapped.auto_created && event.group_member_flag && mapped.parent_event_key.is_none() {
            return match &facts.parent {
                ParentLookup::Collision(parent) => EventAction::ReportGroupKeyCollision {
                    parent: parent.clone(),
                },
                ParentLookup::Found(parent) => EventAction::ConvertSingleToMultiGroup {
                    mapped: mapped.clone(),
                    parent: Some(parent.clone()),
                },
                ParentLookup::NotFound => EventAction::ConvertSingleToMultiGroup {
                    mapped: mapped.clone(),
                    parent: None,
                },
            };
        }
        if !facts.target_exists {
            return EventAction::UnmarkDeletedObject {
                mapped: mapped.clone(),
            };
        }
        return EventAction::UpdateExistingEvent {
            mapped: mapped.clone(),
        };
    }

    if event.create_flag {
        let Some(destination_ref_id) = facts.destination_ref_id else {
            return EventAction::ReportUnknownLocation;
        };
        if !event.group_member_flag {
            return EventAction::CreateSingleEvent { destination_ref_id };
        }
        return match &facts.parent {
            ParentLookup::Found(parent) => EventAction::CreateEventInParentEvent {
                parent: parent.clone(),
            },
            ParentLookup::Collision(parent) => EventAction::ReportGroupKeyCollision {
                parent: parent.clone(),
            },
            ParentLookup::NotFound => EventAction::CreateEventWithNewParent { destination_ref_id },
        };
    }

    match facts.title_candidates.as_slice() {
        [ref_id] => EventAction::AdoptExistingObjectAsEvent { ref_id: *ref_id },
        candidates => EventAction::ReportNonImportedEvent {
            candidates: candidates.to_vec(),
        },
    }
}

/// Decide how to withdraw a mapped event that the feed no longer delivers.
///
/// `child_count` is the number of mapped events still referencing the parent,
/// this one included.
pub fn decide_delete(
    mapped: MappedEvent,
    parent: Option<ParentEvent>,
    child_count: usize,
) -> EventDeleteAction {
    if !mapped.auto_created {
        return EventDeleteAction::UnlinkManualObject { mapped };
    }
    if mapped.parent_event_key.is_some() {
        return match parent {
            Some(parent) if child_count <= 1 => {
                EventDeleteAction::DeleteGroupWithParent { mapped, parent }
            }
            _ => EventDeleteAction::DeleteGroupKeepParent { mapped },
        };
    }
    EventDeleteAction::DeleteSingleEvent { mapped }
}

/// Live courses and groups titled `title` that no mapping claims yet.
pub async fn title_candidates<R, T>(repo: &R, target: &T, title: &str) -> Result<Vec<i64>>
where
    R: EventoRepository + ?Sized,
    T: TargetSystem + ?Sized,
{
    let mut candidates = Vec::new();
    for node in target.find_by_title(title).await? {
        if node.deleted || !node.object_type.has_membership() {
            continue;
        }
        if repo.get_mapped_event_by_ref(node.ref_id).await?.is_some() {
            continue;
        }
        if repo.get_parent_event_by_ref(node.ref_id).await?.is_some() {
            continue;
        }
        candidates.push(node.ref_id);
    }
    candidates.sort_unstable();
    candidates.dedup();
    Ok(candidates)
}

/// Gathers [`EventFacts`] from the mapping store and the target platform.
pub struct EventActionDecider<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    locations: Arc<LocationResolver<R, T>>,
}

impl<R: EventoRepository, T: TargetSystem> EventActionDecider<R, T> {
    pub fn new(repo: Arc<R>, target: Arc<T>, locations: Arc<LocationResolver<R, T>>) -> Self {
        Self {
            repo,
            target,
            locations,
        }
    }

    pub async fn gather_facts(&self, event: &EventoEvent) -> Result<EventFacts> {
        let mapped = self.repo.get_mapped_event(event.evento_id).await?;

        let mut target_exists = false;
        let mut current_parent_ref = None;
        if let Some(m) = &mapped {
            if let Some(node) = self.target.get_node(m.ref_id).await? {
                target_exists = !node.deleted;
                current_parent_ref = node.parent_ref_id;
            }
        }

        let needs_structure = mapped.is_none() && event.create_flag;
        let destination_ref_id = if needs_structure {
            self.locations.resolve(&event.classification).await?
        } else {
            None
        };

        let parent = if event.group_member_flag && (needs_structure || mapped.is_some()) {
            self.lookup_parent(event, current_parent_ref).await?
        } else {
            ParentLookup::NotFound
        };

        let title_candidates = if mapped.is_none() && !event.create_flag {
            title_candidates(&*self.repo, &*self.target, &event.title).await?
        } else {
            Vec::new()
        };

        Ok(EventFacts {
            mapped,
            target_exists,
            destination_ref_id,
            parent,
            title_candidates,
        })
    }

    /// Decide the action for a record against the current state.
    pub async fn determine_action(&self, event: &EventoEvent) -> Result<EventAction> {
        let facts = self.gather_facts(event).await?;
        Ok(decide(event, &facts))
    }

    /// Decide how to withdraw a mapped event the feed no longer delivers.
    pub async fn determine_delete_action(&self, mapped: MappedEvent) -> Result<EventDeleteAction> {
        let Some(key) = mapped.parent_event_key.clone() else {
            return Ok(decide_delete(mapped, None, 0));
        };
        let parent = self.repo.get_parent_event_by_key(&key).await?;
        let child_count = self.repo.list_events_for_parent(&key).await?.len();
        Ok(decide_delete(mapped, parent, child_count))
    }

    /// Find the parent by group key, then by title, then by the container
    /// the mapped object currently sits in.
    async fn lookup_parent(
        &self,
        event: &EventoEvent,
        current_parent_ref: Option<i64>,
    ) -> Result<ParentLookup> {
        let (Some(group), Some(key)) = (event.group.as_ref(), event.group_unique_key()) else {
            return Ok(ParentLookup::NotFound);
        };

        let mut found = self.repo.get_parent_event_by_key(&key).await?;
        if found.is_none() {
            let mut by_title = self.repo.list_parent_events_by_title(&group.name).await?;
            if by_title.len() == 1 {
                found = by_title.pop();
            }
        }
        if found.is_none() {
            if let Some(ref_id) = current_parent_ref {
                found = self.repo.get_parent_event_by_ref(ref_id).await?;
            }
        }

        Ok(match found {
            None => ParentLookup::NotFound,
            Some(parent) if parent.group_evento_id != group.group_id => {
                ParentLookup::Collision(parent)
            }
            Some(parent) => ParentLookup::Found(parent),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::fake::FakeTarget;
    use crate::target::ObjectType;
    use chrono::Utc;
    use evento_core::config::LocationSettings;
    use evento_core::db::repository::{EventRepository, LocationRepository, ParentEventRepository};
    use evento_core::db::sqlite::SqliteRepository;
    use evento_core::db::DatabasePool;
    use evento_core::models::event::{Classification, EventGroup};
    use evento_core::models::location::Location;

    fn event(create_flag: bool, group_member_flag: bool) -> EventoEvent {
        EventoEvent {
            evento_id: 42,
            title: "Algebra I".into(),
            description: None,
            classification: Classification {
                department: "X".into(),
                kind: "Y".into(),
                year: "2024".into(),
            },
            start_date: None,
            end_date: None,
            create_flag,
            group_member_flag,
            group: group_member_flag.then(|| EventGroup {
                group_id: 900,
                name: "Algebra".into(),
                member_count: Some(2),
            }),
            employees: Vec::new(),
            students: Vec::new(),
        }
    }

    fn mapped(auto_created: bool, parent_event_key: Option<&str>) -> MappedEvent {
        MappedEvent {
            evento_id: 42,
            evento_title: "Algebra I".into(),
            ref_id: 500,
            admin_role_id: 5001,
            member_role_id: 5002,
            parent_event_key: parent_event_key.map(String::from),
            auto_created,
            target_deleted: false,
            last_imported: Utc::now(),
        }
    }

    fn parent(group_evento_id: i64) -> ParentEvent {
        ParentEvent {
            group_unique_key: "key".into(),
            group_evento_id,
            title: "Algebra".into(),
            ref_id: 400,
            admin_role_id: 4001,
            member_role_id: 4002,
        }
    }

    fn facts() -> EventFacts {
        EventFacts {
            mapped: None,
            target_exists: false,
            destination_ref_id: Some(12),
            parent: ParentLookup::NotFound,
            title_candidates: Vec::new(),
        }
    }

    #[test]
    fn new_single_event_with_location_is_created() {
        let action = decide(&event(true, false), &facts());
        assert_eq!(
            action,
            EventAction::CreateSingleEvent {
                destination_ref_id: 12
            }
        );
    }

    #[test]
    fn former_single_event_with_siblings_is_converted() {
        let f = EventFacts {
            mapped: Some(mapped(true, None)),
            target_exists: true,
            ..facts()
        };
        let action = decide(&event(true, true), &f);
        assert!(matches!(
            action,
            EventAction::ConvertSingleToMultiGroup { parent: None, .. }
        ));
    }

    #[test]
    fn convert_reuses_found_parent() {
        let f = EventFacts {
            mapped: Some(mapped(true, None)),
            target_exists: true,
            parent: ParentLookup::Found(parent(900)),
            ..facts()
        };
        match decide(&event(false, true), &f) {
            EventAction::ConvertSingleToMultiGroup { parent, .. } => {
                assert_eq!(parent.unwrap().ref_id, 400)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn adopted_object_is_never_converted() {
        let f = EventFacts {
            mapped: Some(mapped(false, None)),
            target_exists: true,
            ..facts()
        };
        assert!(matches!(
            decide(&event(true, true), &f),
            EventAction::UpdateExistingEvent { .. }
        ));
    }

    #[test]
    fn trashed_target_is_unmarked_not_recreated() {
        let f = EventFacts {
            mapped: Some(mapped(true, None)),
            target_exists: false,
            ..facts()
        };
        assert!(matches!(
            decide(&event(true, false), &f),
            EventAction::UnmarkDeletedObject { .. }
        ));
    }

    #[test]
    fn unknown_location_is_reported() {
        let f = EventFacts {
            destination_ref_id: None,
            ..facts()
        };
        assert_eq!(
            decide(&event(true, true), &f),
            EventAction::ReportUnknownLocation
        );
    }

    #[test]
    fn group_member_goes_into_existing_parent() {
        let f = EventFacts {
            parent: ParentLookup::Found(parent(900)),
            ..facts()
        };
        assert!(matches!(
            decide(&event(true, true), &f),
            EventAction::CreateEventInParentEvent { .. }
        ));
    }

    #[test]
    fn first_group_member_creates_parent() {
        assert_eq!(
            decide(&event(true, true), &facts()),
            EventAction::CreateEventWithNewParent {
                destination_ref_id: 12
            }
        );
    }

    #[test]
    fn collision_is_reported_not_merged() {
        let f = EventFacts {
            parent: ParentLookup::Collision(parent(777)),
            ..facts()
        };
        assert!(matches!(
            decide(&event(true, true), &f),
            EventAction::ReportGroupKeyCollision { .. }
        ));
    }

    #[test]
    fn unique_title_match_is_adopted() {
        let f = EventFacts {
            title_candidates: vec![300],
            ..facts()
        };
        assert_eq!(
            decide(&event(false, false), &f),
            EventAction::AdoptExistingObjectAsEvent { ref_id: 300 }
        );
    }

    #[test]
    fn zero_or_many_title_matches_are_reported() {
        assert_eq!(
            decide(&event(false, false), &facts()),
            EventAction::ReportNonImportedEvent { candidates: vec![] }
        );
        let f = EventFacts {
            title_candidates: vec![300, 301],
            ..facts()
        };
        assert_eq!(
            decide(&event(false, true), &f),
            EventAction::ReportNonImportedEvent {
                candidates: vec![300, 301]
            }
        );
    }

    #[test]
    fn decision_is_total_and_idempotent() {
        for mapped_present in [false, true] {
            for create_flag in [false, true] {
                for group_member_flag in [false, true] {
                    for auto_created in [false, true] {
                        for target_exists in [false, true] {
                            let e = event(create_flag, group_member_flag);
                            let f = EventFacts {
                                mapped: mapped_present.then(|| mapped(auto_created, None)),
                                target_exists,
                                ..facts()
                            };
                            let first = decide(&e, &f);
                            let second = decide(&e, &f);
                            assert_eq!(first, second);
                            assert!(!first.kind().is_empty());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn delete_decisions() {
        assert!(matches!(
            decide_delete(mapped(false, Some("key")), Some(parent(900)), 1),
            EventDeleteAction::UnlinkManualObject { .. }
        ));
        assert!(matches!(
            decide_delete(mapped(true, Some("key")), Some(parent(900)), 1),
            EventDeleteAction::DeleteGroupWithParent { .. }
        ));
        assert!(matches!(
            decide_delete(mapped(true, Some("key")), Some(parent(900)), 2),
            EventDeleteAction::DeleteGroupKeepParent { .. }
        ));
        assert!(matches!(
            decide_delete(mapped(true, Some("key")), None, 0),
            EventDeleteAction::DeleteGroupKeepParent { .. }
        ));
        let single = decide_delete(mapped(true, None), None, 0);
        assert_eq!(single.kind(), "delete_single_event");
        assert_eq!(single.mapped().ref_id, 500);
    }

    async fn decider() -> (
        EventActionDecider<SqliteRepository, FakeTarget>,
        Arc<SqliteRepository>,
        Arc<FakeTarget>,
    ) {
        let DatabasePool::Sqlite(pool) = DatabasePool::new_sqlite_memory().await.unwrap();
        let repo = Arc::new(SqliteRepository::new(pool));
        let target = Arc::new(FakeTarget::new());
        let settings = LocationSettings {
            departments: vec!["X".into()],
            kinds: vec!["Y".into()],
            years: vec!["2024".into()],
            ..Default::default()
        };
        let locations = Arc::new(LocationResolver::new(
            repo.clone(),
            target.clone(),
            settings,
            1,
        ));
        (
            EventActionDecider::new(repo.clone(), target.clone(), locations),
            repo,
            target,
        )
    }

    #[tokio::test]
    async fn determine_action_creates_single_event_at_location() {
        let (decider, repo, _target) = decider().await;
        repo.replace_locations(&[Location {
            department: "X".into(),
            kind: "Y".into(),
            year: "2024".into(),
            ref_id: 12,
        }])
        .await
        .unwrap();

        let action = decider.determine_action(&event(true, false)).await.unwrap();
        assert_eq!(
            action,
            EventAction::CreateSingleEvent {
                destination_ref_id: 12
            }
        );
    }

    #[tokio::test]
    async fn gather_facts_sees_trashed_target() {
        let (decider, repo, target) = decider().await;
        target.add_container(500, 1, ObjectType::Course, "Algebra I");
        target.trash(500);
        repo.upsert_mapped_event(&mapped(true, None)).await.unwrap();

        let facts = decider.gather_facts(&event(true, false)).await.unwrap();
        assert!(facts.mapped.is_some());
        assert!(!facts.target_exists);
    }

    #[tokio::test]
    async fn parent_lookup_detects_collision_by_title() {
        let (decider, repo, _target) = decider().await;
        let mut other = parent(777);
        other.group_unique_key = "other-key".into();
        repo.upsert_parent_event(&other).await.unwrap();

        let facts = decider.gather_facts(&event(true, true)).await.unwrap();
        assert!(matches!(facts.parent, ParentLookup::Collision(_)));
    }

    #[tokio::test]
    async fn parent_lookup_by_key() {
        let (decider, repo, _target) = decider().await;
        let e = event(true, true);
        let mut p = parent(900);
        p.group_unique_key = e.group_unique_key().unwrap();
        p.title = "Renamed".into();
        repo.upsert_parent_event(&p).await.unwrap();

        let facts = decider.gather_facts(&e).await.unwrap();
        assert_eq!(facts.parent, ParentLookup::Found(p));
    }

    #[tokio::test]
    async fn title_candidates_skip_mapped_and_parent_objects() {
        let (_decider, repo, target) = decider().await;
        target.add_container(300, 1, ObjectType::Course, "Algebra I");
        target.add_container(301, 1, ObjectType::Group, "Algebra I");
        target.add_container(302, 1, ObjectType::Course, "Algebra I");
        target.add_node(303, Some(1), ObjectType::Folder, "Algebra I");
        target.add_container(304, 1, ObjectType::Course, "Algebra I");
        target.trash(304);
        target.add_container(400, 1, ObjectType::Course, "Algebra I");

        let mut other = mapped(false, None);
        other.evento_id = 7;
        other.ref_id = 301;
        repo.upsert_mapped_event(&other).await.unwrap();
        repo.upsert_parent_event(&parent(900)).await.unwrap();

        let candidates = title_candidates(&*repo, &*target, "Algebra I").await.unwrap();
        assert_eq!(candidates, vec![300, 302]);
    }

    #[tokio::test]
    async fn determine_delete_counts_siblings() {
        let (decider, repo, _target) = decider().await;
        repo.upsert_parent_event(&parent(900)).await.unwrap();
        let mut first = mapped(true, Some("key"));
        repo.upsert_mapped_event(&first).await.unwrap();
        first.evento_id = 43;
        first.ref_id = 501;
        repo.upsert_mapped_event(&first).await.unwrap();

        let action = decider
            .determine_delete_action(mapped(true, Some("key")))
            .await
            .unwrap();
        assert!(matches!(action, EventDeleteAction::DeleteGroupKeepParent { .. }));

        repo.delete_mapped_event(43).await.unwrap();
        let action = decider
            .determine_delete_action(mapped(true, Some("key")))
            .await
            .unwrap();
        assert!(matches!(action, EventDeleteAction::DeleteGroupWithParent { .. }));
    }
}
