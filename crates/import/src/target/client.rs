//! Typed reqwest wrapper for the target platform's REST API.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use evento_core::config::TargetConfig;
use evento_core::error::{EventoError, Result};

use super::{
    ContainerRoles, CreatedContainer, NewContainer, TargetObjects, TargetRoles, TargetTree,
    TargetUser, TargetUsers, TreeNode, UserProfile,
};

/// HTTP client for the target platform.
pub struct TargetClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleList {
    role_ids: Vec<i64>,
}

impl TargetClient {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        }
    }

    /// Override the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| EventoError::Target(format!("{what} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EventoError::Target(format!("{what} failed ({status}): {body}")));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.send(request, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| EventoError::Target(format!("{what} parse failed: {e}")))
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<Option<T>> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| EventoError::Target(format!("{what} request failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EventoError::Target(format!("{what} failed ({status}): {body}")));
        }

        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| EventoError::Target(format!("{what} parse failed: {e}")))
    }
}

#[async_trait]
impl TargetTree for TargetClient {
    async fn get_node(&self, ref_id: i64) -> Result<Option<TreeNode>> {
        self.get_optional(&format!("/tree/{ref_id}"), "get node")
            .await
    }

    async fn list_children(&self, ref_id: i64) -> Result<Vec<TreeNode>> {
        let request = self.http.get(self.url(&format!("/tree/{ref_id}/children")));
        self.send_json(request, "list children").await
    }

    async fn find_by_title(&self, title: &str) -> Result<Vec<TreeNode>> {
        let request = self
            .http
            .get(self.url("/tree/search"))
            .query(&[("title", title)]);
        self.send_json(request, "search by title").await
    }

    async fn move_node(&self, ref_id: i64, new_parent_ref_id: i64) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/tree/{ref_id}/parent")))
            .json(&serde_json::json!({ "parentRefId": new_parent_ref_id }));
        self.send(request, "move node").await?;
        Ok(())
    }

    async fn move_to_trash(&self, ref_id: i64) -> Result<()> {
        let request = self.http.delete(self.url(&format!("/tree/{ref_id}")));
        self.send(request, "move to trash").await?;
        Ok(())
    }
}

#[async_trait]
impl TargetObjects for TargetClient {
    async fn create_container(&self, container: &NewContainer) -> Result<CreatedContainer> {
        let request = self.http.post(self.url("/containers")).json(container);
        self.send_json(request, "create container").await
    }

    async fn update_container(
        &self,
        ref_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/containers/{ref_id}")))
            .json(&serde_json::json!({ "title": title, "description": description }));
        self.send(request, "update container").await?;
        Ok(())
    }

    async fn get_container_roles(&self, ref_id: i64) -> Result<Option<ContainerRoles>> {
        self.get_optional(&format!("/containers/{ref_id}/roles"), "get container roles")
            .await
    }
}

#[async_trait]
impl TargetRoles for TargetClient {
    async fn list_user_roles(&self, user_id: i64) -> Result<Vec<i64>> {
        let request = self.http.get(self.url(&format!("/users/{user_id}/roles")));
        let list: RoleList = self.send_json(request, "list user roles").await?;
        Ok(list.role_ids)
    }

    async fn assign_role(&self, role_id: i64, user_id: i64) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/roles/{role_id}/members/{user_id}")));
        self.send(request, "assign role").await?;
        Ok(())
    }

    async fn deassign_role(&self, role_id: i64, user_id: i64) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("/roles/{role_id}/members/{user_id}")));
        self.send(request, "deassign role").await?;
        Ok(())
    }

    async fn add_favourite(&self, user_id: i64, ref_id: i64) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/users/{user_id}/favourites/{ref_id}")));
        self.send(request, "add favourite").await?;
        Ok(())
    }

    async fn remove_favourite(&self, user_id: i64, ref_id: i64) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("/users/{user_id}/favourites/{ref_id}")));
        self.send(request, "remove favourite").await?;
        Ok(())
    }
}

#[async_trait]
impl TargetUsers for TargetClient {
    async fn get_user(&self, user_id: i64) -> Result<Option<TargetUser>> {
        self.get_optional(&format!("/users/{user_id}"), "get user")
            .await
    }

    async fn create_user(&self, profile: &UserProfile) -> Result<TargetUser> {
        let request = self.http.post(self.url("/users")).json(profile);
        self.send_json(request, "create user").await
    }

    async fn update_user(&self, user_id: i64, profile: &UserProfile) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/users/{user_id}")))
            .json(profile);
        self.send(request, "update user").await?;
        Ok(())
    }

    async fn set_auth_mode(&self, user_id: i64, auth_mode: &str) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/users/{user_id}/auth-mode")))
            .json(&serde_json::json!({ "authMode": auth_mode }));
        self.send(request, "set auth mode").await?;
        Ok(())
    }

    async fn deactivate_user(&self, user_id: i64) -> Result<()> {
        let request = self
            .http
            .post(self.url(&format!("/users/{user_id}/deactivate")));
        self.send(request, "deactivate user").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ObjectType;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> TargetClient {
        TargetClient::new(&TargetConfig {
            base_url: "https://lms.example".into(),
            api_token: "tok".into(),
            root_ref_id: 1,
        })
        .with_base_url(uri)
    }

    #[tokio::test]
    async fn get_node_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tree/55"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "refId": 55,
                "parentRefId": 10,
                "objectType": "course",
                "title": "Algebra",
                "deleted": true
            })))
            .mount(&mock_server)
            .await;

        let node = client(&mock_server.uri())
            .get_node(55)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.object_type, ObjectType::Course);
        assert_eq!(node.parent_ref_id, Some(10));
        assert!(node.deleted);
    }

    #[tokio::test]
    async fn get_node_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tree/56"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        assert!(client(&mock_server.uri())
            .get_node(56)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_by_title_sends_query() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tree/search"))
            .and(query_param("title", "Algebra I"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "refId": 70, "objectType": "group", "title": "Algebra I" }
            ])))
            .mount(&mock_server)
            .await;

        let nodes = client(&mock_server.uri())
            .find_by_title("Algebra I")
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].parent_ref_id, None);
    }

    #[tokio::test]
    async fn create_container_posts_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/containers"))
            .and(body_json(serde_json::json!({
                "objectType": "course",
                "title": "Algebra",
                "parentRefId": 10,
                "ownerUserId": 6
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "refId": 300,
                "adminRoleId": 3001,
                "memberRoleId": 3002
            })))
            .mount(&mock_server)
            .await;

        let created = client(&mock_server.uri())
            .create_container(&NewContainer {
                object_type: ObjectType::Course,
                title: "Algebra".into(),
                description: None,
                parent_ref_id: 10,
                owner_user_id: Some(6),
                start_date: None,
                end_date: None,
            })
            .await
            .unwrap();
        assert_eq!(created.ref_id, 300);
        assert_eq!(created.member_role_id, 3002);
    }

    #[tokio::test]
    async fn role_membership_check_uses_role_list() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/users/8/roles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "roleIds": [4, 3001]
            })))
            .mount(&mock_server)
            .await;

        let client = client(&mock_server.uri());
        assert!(client.is_assigned(3001, 8).await.unwrap());
        assert!(!client.is_assigned(3002, 8).await.unwrap());
    }

    #[tokio::test]
    async fn assign_role_failure_is_target_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/roles/3001/members/8"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server.uri())
            .assign_role(3001, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, EventoError::Target(_)));
        assert!(err.to_string().contains("403"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn deactivate_user_posts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/users/8/deactivate"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        client(&mock_server.uri()).deactivate_user(8).await.unwrap();
    }
}
