//! Applies decided event actions to the target platform and the mapping store.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use evento_core::config::{EventImportConfig, ObjectOwner};
use evento_core::db::repository::EventoRepository;
use evento_core::error::{EventoError, Result};
use evento_core::models::event::{EventGroup, EventoEvent, MappedEvent, ParentEvent};
use evento_core::models::import::AnomalyKind;

use crate::event_action::{title_candidates, EventAction, EventDeleteAction};
use crate::target::{CreatedContainer, NewContainer, ObjectType, TargetSystem, ROOT_REF_ID};

/// What executing an [`EventAction`] left behind.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The event is mapped to a live container; memberships can be synchronized.
    Mapped(MappedEvent),
    /// The target object is gone; the mapping is kept as a tombstone.
    Tombstoned(MappedEvent),
    /// Nothing was changed; the condition needs an operator.
    Reported(AnomalyKind, String),
}

pub struct EventActionExecutor<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    config: EventImportConfig,
}

impl<R: EventoRepository, T: TargetSystem> EventActionExecutor<R, T> {
    pub fn new(repo: Arc<R>, target: Arc<T>, config: EventImportConfig) -> Self {
        Self {
            repo,
            target,
            config,
        }
    }

    pub async fn execute(
        &self,
        event: &EventoEvent,
        action: EventAction,
    ) -> Result<ExecutionOutcome> {
        match action {
            EventAction::CreateSingleEvent { destination_ref_id } => {
                let created = self
                    .create(ObjectType::Course, event, destination_ref_id)
                    .await?;
                let mapped = self.store_new(event, &created, None).await?;
                info!(evento_id = event.evento_id, ref_id = created.ref_id, "Created course");
                Ok(ExecutionOutcome::Mapped(mapped))
            }
            EventAction::CreateEventWithNewParent { destination_ref_id } => {
                let (group, key) = group_of(event)?;
                let parent = self
                    .create_parent(group, key, destination_ref_id, event)
                    .await?;
                let created = self
                    .create(ObjectType::Group, event, parent.ref_id)
                    .await?;
                let mapped = self
                    .store_new(event, &created, Some(parent.group_unique_key))
                    .await?;
                info!(
                    evento_id = event.evento_id,
                    ref_id = created.ref_id,
                    parent_ref_id = parent.ref_id,
                    "Created group with new parent course"
                );
                Ok(ExecutionOutcome::Mapped(mapped))
            }
            EventAction::CreateEventInParentEvent { parent } => {
                let created = self
                    .create(ObjectType::Group, event, parent.ref_id)
                    .await?;
                let mapped = self
                    .store_new(event, &created, Some(parent.group_unique_key))
                    .await?;
                info!(
                    evento_id = event.evento_id,
                    ref_id = created.ref_id,
                    parent_ref_id = parent.ref_id,
                    "Created group in existing parent course"
                );
                Ok(ExecutionOutcome::Mapped(mapped))
            }
            EventAction::ConvertSingleToMultiGroup { mapped, parent } => {
                self.convert_to_multi_group(event, mapped, parent).await
            }
            EventAction::UnmarkDeletedObject { mut mapped } => {
                mapped.target_deleted = true;
                mapped.last_imported = Utc::now();
                self.repo.upsert_mapped_event(&mapped).await?;
                debug!(evento_id = mapped.evento_id, ref_id = mapped.ref_id, "Target object is gone");
                Ok(ExecutionOutcome::Tombstoned(mapped))
            }
            EventAction::UpdateExistingEvent { mut mapped } => {
                // Adopted objects belong to their authors; only our own are renamed.
                if mapped.auto_created && mapped.evento_title != event.title {
                    self.target
                        .update_container(mapped.ref_id, &event.title, event.description.as_deref())
                        .await?;
                }
                mapped.evento_title = event.title.clone();
                mapped.target_deleted = false;
                mapped.last_imported = Utc::now();
                self.repo.upsert_mapped_event(&mapped).await?;
                Ok(ExecutionOutcome::Mapped(mapped))
            }
            EventAction::AdoptExistingObjectAsEvent { ref_id } => self.adopt(event, ref_id).await,
            EventAction::ReportUnknownLocation => {
                let c = &event.classification;
                Ok(ExecutionOutcome::Reported(
                    AnomalyKind::UnknownLocation,
                    format!(
                        "No location configured for {}/{}/{}",
                        c.department, c.kind, c.year
                    ),
                ))
            }
            EventAction::ReportNonImportedEvent { candidates } => {
                let message = if candidates.is_empty() {
                    format!("No target object titled '{}'", event.title)
                } else {
                    format!(
                        "{} target objects titled '{}': {:?}",
                        candidates.len(),
                        event.title,
                        candidates
                    )
                };
                Ok(ExecutionOutcome::Reported(AnomalyKind::NonImportedEvent, message))
            }
            EventAction::ReportGroupKeyCollision { parent } => Ok(ExecutionOutcome::Reported(
                AnomalyKind::GroupKeyCollision,
                format!(
                    "Parent course '{}' (ref {}) belongs to Evento group {}",
                    parent.title, parent.ref_id, parent.group_evento_id
                ),
            )),
        }
    }

    pub async fn execute_delete(&self, action: EventDeleteAction) -> Result<()> {
        let kind = action.kind();
        match action {
            EventDeleteAction::UnlinkManualObject { mapped } => {
                self.drop_mapping(&mapped).await?;
            }
            EventDeleteAction::DeleteSingleEvent { mapped }
            | EventDeleteAction::DeleteGroupKeepParent { mapped } => {
                self.trash_if_live(mapped.ref_id).await?;
                self.drop_mapping(&mapped).await?;
            }
            EventDeleteAction::DeleteGroupWithParent { mapped, parent } => {
                self.trash_if_live(mapped.ref_id).await?;
                self.drop_mapping(&mapped).await?;
                self.trash_if_live(parent.ref_id).await?;
                self.repo
                    .delete_parent_event(&parent.group_unique_key)
                    .await?;
            }
        }
        debug!(action = kind, "Executed delete action");
        Ok(())
    }

    async fn convert_to_multi_group(
        &self,
        event: &EventoEvent,
        mut mapped: MappedEvent,
        parent: Option<ParentEvent>,
    ) -> Result<ExecutionOutcome> {
        let node = match self.target.get_node(mapped.ref_id).await? {
            Some(node) if !node.deleted => node,
            _ => {
                mapped.target_deleted = true;
                mapped.last_imported = Utc::now();
                self.repo.upsert_mapped_event(&mapped).await?;
                return Ok(ExecutionOutcome::Tombstoned(mapped));
            }
        };

        let (group, key) = group_of(event)?;
        let parent = match parent {
            Some(parent) => parent,
            None => {
                let location = node.parent_ref_id.unwrap_or(ROOT_REF_ID);
                self.create_parent(group, key, location, event).await?
            }
        };

        self.target.move_node(mapped.ref_id, parent.ref_id).await?;
        mapped.parent_event_key = Some(parent.group_unique_key.clone());
        mapped.evento_title = event.title.clone();
        mapped.target_deleted = false;
        mapped.last_imported = Utc::now();
        self.repo.upsert_mapped_event(&mapped).await?;
        info!(
            evento_id = mapped.evento_id,
            ref_id = mapped.ref_id,
            parent_ref_id = parent.ref_id,
            "Converted single course into group of a parent course"
        );
        Ok(ExecutionOutcome::Mapped(mapped))
    }

    /// Adopt a manually created object, re-checking that its title match is
    /// still unique right before the mapping is written.
    async fn adopt(&self, event: &EventoEvent, ref_id: i64) -> Result<ExecutionOutcome> {
        let candidates = title_candidates(&*self.repo, &*self.target, &event.title).await?;
        if candidates != [ref_id] {
            return Ok(ExecutionOutcome::Reported(
                AnomalyKind::AdoptionPreconditionFailed,
                format!(
                    "Object {ref_id} is no longer the only unmapped object titled '{}'",
                    event.title
                ),
            ));
        }
        let Some(roles) = self.target.get_container_roles(ref_id).await? else {
            return Ok(ExecutionOutcome::Reported(
                AnomalyKind::AdoptionPreconditionFailed,
                format!("Object {ref_id} has no member roles"),
            ));
        };

        let mapped = MappedEvent {
            evento_id: event.evento_id,
            evento_title: event.title.clone(),
            ref_id,
            admin_role_id: roles.admin_role_id,
            member_role_id: roles.member_role_id,
            parent_event_key: None,
            auto_created: false,
            target_deleted: false,
            last_imported: Utc::now(),
        };
        self.repo.upsert_mapped_event(&mapped).await?;
        info!(evento_id = event.evento_id, ref_id, "Adopted existing object");
        Ok(ExecutionOutcome::Mapped(mapped))
    }

    async fn create(
        &self,
        object_type: ObjectType,
        event: &EventoEvent,
        parent_ref_id: i64,
    ) -> Result<CreatedContainer> {
        self.target
            .create_container(&NewContainer {
                object_type,
                title: event.title.clone(),
                description: event.description.clone(),
                parent_ref_id,
                owner_user_id: self.owner(),
                start_date: event.start_date,
                end_date: event.end_date,
            })
            .await
    }

    async fn create_parent(
        &self,
        group: &EventGroup,
        key: String,
        parent_ref_id: i64,
        event: &EventoEvent,
    ) -> Result<ParentEvent> {
        let created = self
            .target
            .create_container(&NewContainer {
                object_type: ObjectType::Course,
                title: group.name.clone(),
                description: None,
                parent_ref_id,
                owner_user_id: self.owner(),
                start_date: event.start_date,
                end_date: event.end_date,
            })
            .await?;
        let parent = ParentEvent {
            group_unique_key: key,
            group_evento_id: group.group_id,
            title: group.name.clone(),
            ref_id: created.ref_id,
            admin_role_id: created.admin_role_id,
            member_role_id: created.member_role_id,
        };
        self.repo.upsert_parent_event(&parent).await?;
        info!(
            group_id = group.group_id,
            ref_id = parent.ref_id,
            title = %parent.title,
            "Created parent course"
        );
        Ok(parent)
    }

    async fn store_new(
        &self,
        event: &EventoEvent,
        created: &CreatedContainer,
        parent_event_key: Option<String>,
    ) -> Result<MappedEvent> {
        let mapped = MappedEvent {
            evento_id: event.evento_id,
            evento_title: event.title.clone(),
            ref_id: created.ref_id,
            admin_role_id: created.admin_role_id,
            member_role_id: created.member_role_id,
            parent_event_key,
            auto_created: true,
            target_deleted: false,
            last_imported: Utc::now(),
        };
        self.repo.upsert_mapped_event(&mapped).await?;
        Ok(mapped)
    }

    async fn trash_if_live(&self, ref_id: i64) -> Result<()> {
        match self.target.get_node(ref_id).await? {
            Some(node) if !node.deleted => self.target.move_to_trash(ref_id).await,
            _ => Ok(()),
        }
    }

    async fn drop_mapping(&self, mapped: &MappedEvent) -> Result<()> {
        self.repo
            .delete_memberships_for_event(mapped.evento_id)
            .await?;
        self.repo.delete_mapped_event(mapped.evento_id).await?;
        Ok(())
    }

    fn owner(&self) -> Option<i64> {
        match self.config.object_owner {
            ObjectOwner::Root => None,
            ObjectOwner::User(id) => Some(id),
        }
    }
}

fn group_of(event: &EventoEvent) -> Result<(&EventGroup, String)> {
    match (event.group.as_ref(), event.group_unique_key()) {
        (Some(group), Some(key)) => Ok((group, key)),
        _ => Err(EventoError::record(
            Some(event.evento_id),
            "group member without group attributes",
        )),
    }
}
