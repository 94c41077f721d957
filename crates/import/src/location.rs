//! Maps an event's department/kind/year classification to the target
//! category that receives its course.

use std::sync::Arc;

use tracing::{debug, info, warn};

use evento_core::config::LocationSettings;
use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::models::event::Classification;
use evento_core::models::location::Location;

use crate::target::{ObjectType, TargetSystem, TreeNode};

pub struct LocationResolver<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    settings: LocationSettings,
    root_ref_id: i64,
}

impl<R: EventoRepository, T: TargetSystem> LocationResolver<R, T> {
    pub fn new(repo: Arc<R>, target: Arc<T>, settings: LocationSettings, root_ref_id: i64) -> Self {
        Self {
            repo,
            target,
            settings,
            root_ref_id,
        }
    }

    /// Whether the combination is covered by the configured allow-lists.
    pub fn is_allowed(&self, classification: &Classification) -> bool {
        let department_allowed = self
            .settings
            .departments
            .iter()
            .any(|d| self.settings.department_label(d) == classification.department);
        department_allowed
            && self.settings.kinds.contains(&classification.kind)
            && self.settings.years.contains(&classification.year)
    }

    /// Destination category ref for an event, or `None` if the combination
    /// is not configured or not present in the location table.
    pub async fn resolve(&self, classification: &Classification) -> Result<Option<i64>> {
        if !self.is_allowed(classification) {
            debug!(
                department = %classification.department,
                kind = %classification.kind,
                year = %classification.year,
                "Location not in allow-list"
            );
            return Ok(None);
        }
        let location = self
            .repo
            .get_location(
                &classification.department,
                &classification.kind,
                &classification.year,
            )
            .await?;
        Ok(location.map(|l| l.ref_id))
    }

    /// Rebuild the location table from the target tree.
    ///
    /// Walks root, department, kind and year categories for every configured
    /// combination and replaces the stored table in one transaction.
    pub async fn rebuild(&self) -> Result<Vec<Location>> {
        let mut locations = Vec::new();
        let root_children = self.target.list_children(self.root_ref_id).await?;

        for department_title in &self.settings.departments {
            let Some(department) = find_category(&root_children, department_title) else {
                warn!(department = %department_title, "Department category not found");
                continue;
            };
            let kind_nodes = self.target.list_children(department.ref_id).await?;

            for kind in &self.settings.kinds {
                let Some(kind_node) = find_category(&kind_nodes, kind) else {
                    debug!(department = %department_title, kind = %kind, "Kind category not found");
                    continue;
                };
                let year_nodes = self.target.list_children(kind_node.ref_id).await?;

                for year in &self.settings.years {
                    let Some(year_node) = find_category(&year_nodes, year) else {
                        continue;
                    };
                    locations.push(Location {
                        department: self.settings.department_label(department_title).to_string(),
                        kind: kind.clone(),
                        year: year.clone(),
                        ref_id: year_node.ref_id,
                    });
                }
            }
        }

        self.repo.replace_locations(&locations).await?;
        info!(locations = locations.len(), "Rebuilt location table");
        Ok(locations)
    }
}

fn find_category<'a>(nodes: &'a [TreeNode], title: &str) -> Option<&'a TreeNode> {
    nodes
        .iter()
        .find(|n| n.object_type == ObjectType::Category && !n.deleted && n.title == title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::fake::FakeTarget;
    use evento_core::db::repository::LocationRepository;
    use evento_core::db::sqlite::SqliteRepository;
    use evento_core::db::DatabasePool;
    use std::collections::BTreeMap;

    async fn setup() -> (Arc<SqliteRepository>, Arc<FakeTarget>) {
        let DatabasePool::Sqlite(pool) = DatabasePool::new_sqlite_memory().await.unwrap();
        (Arc::new(SqliteRepository::new(pool)), Arc::new(FakeTarget::new()))
    }

    fn settings() -> LocationSettings {
        LocationSettings {
            departments: vec!["Informatik".into(), "Wirtschaft".into()],
            kinds: vec!["Bachelor".into(), "Master".into()],
            years: vec!["2024".into()],
            department_aliases: BTreeMap::from([("Informatik".to_string(), "I".to_string())]),
        }
    }

    fn classification(department: &str, kind: &str, year: &str) -> Classification {
        Classification {
            department: department.into(),
            kind: kind.into(),
            year: year.into(),
        }
    }

    fn build_tree(target: &FakeTarget) {
        target.add_node(10, Some(1), ObjectType::Category, "Informatik");
        target.add_node(11, Some(10), ObjectType::Category, "Bachelor");
        target.add_node(12, Some(11), ObjectType::Category, "2024");
        target.add_node(13, Some(11), ObjectType::Category, "2023");
        target.add_node(20, Some(1), ObjectType::Category, "Wirtschaft");
        target.add_node(21, Some(20), ObjectType::Category, "Master");
        target.add_node(22, Some(21), ObjectType::Category, "2024");
        // A course with a matching title is not a category.
        target.add_node(30, Some(1), ObjectType::Course, "Musik");
    }

    #[tokio::test]
    async fn rebuild_walks_configured_combinations() {
        let (repo, target) = setup().await;
        build_tree(&target);
        let resolver = LocationResolver::new(repo.clone(), target, settings(), 1);

        let locations = resolver.rebuild().await.unwrap();
        assert_eq!(locations.len(), 2);
        assert!(locations.iter().any(|l| l.matches("I", "Bachelor", "2024") && l.ref_id == 12));
        assert!(locations
            .iter()
            .any(|l| l.matches("Wirtschaft", "Master", "2024") && l.ref_id == 22));
        assert_eq!(repo.list_locations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rebuild_purges_stale_rows() {
        let (repo, target) = setup().await;
        repo.replace_locations(&[Location {
            department: "Old".into(),
            kind: "Gone".into(),
            year: "1999".into(),
            ref_id: 99,
        }])
        .await
        .unwrap();
        build_tree(&target);
        let resolver = LocationResolver::new(repo.clone(), target, settings(), 1);
        resolver.rebuild().await.unwrap();

        assert!(repo.get_location("Old", "Gone", "1999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_uses_alias_and_table() {
        let (repo, target) = setup().await;
        build_tree(&target);
        let resolver = LocationResolver::new(repo, target, settings(), 1);
        resolver.rebuild().await.unwrap();

        assert_eq!(
            resolver
                .resolve(&classification("I", "Bachelor", "2024"))
                .await
                .unwrap(),
            Some(12)
        );
        // Configured, but no category exists on the target.
        assert_eq!(
            resolver
                .resolve(&classification("I", "Master", "2024"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn resolve_rejects_unlisted_combination() {
        let (repo, target) = setup().await;
        build_tree(&target);
        repo.replace_locations(&[Location {
            department: "I".into(),
            kind: "Bachelor".into(),
            year: "2023".into(),
            ref_id: 13,
        }])
        .await
        .unwrap();
        let resolver = LocationResolver::new(repo, target, settings(), 1);

        assert!(!resolver.is_allowed(&classification("I", "Bachelor", "2023")));
        assert_eq!(
            resolver
                .resolve(&classification("I", "Bachelor", "2023"))
                .await
                .unwrap(),
            None
        );
    }
}
