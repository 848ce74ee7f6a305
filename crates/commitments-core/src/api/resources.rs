//! Typed calls for the commitment tracker's resource endpoints.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::client::required;
use super::{ApiClient, ApiError};
use crate::models::{
    Commitment, CommitmentCategory, Notification, NotificationInvitation, Page, Report,
    ReportRequest, Role, Status, Task, User,
};

/// Default page size used by list screens
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Filters for `GET /commitments`
#[derive(Debug, Clone, Default)]
pub struct CommitmentQuery {
    pub page: u32,
    pub size: u32,
    pub user_id: Option<String>,
    pub status_id: Option<String>,
    pub category_id: Option<String>,
}

impl CommitmentQuery {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            ..Default::default()
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("size", self.size.to_string()),
        ];
        // Empty filters are left out, like unset ones
        let optional = [
            ("userId", &self.user_id),
            ("statusId", &self.status_id),
            ("commitmentCategoryId", &self.category_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                params.push((key, value.to_string()));
            }
        }
        params
    }
}

fn paged<'a>(page: u32, size: u32, extra: &[(&'a str, Option<&str>)]) -> Vec<(&'a str, String)> {
    let mut params = vec![("page", page.to_string()), ("size", size.to_string())];
    for &(key, value) in extra {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            params.push((key, value.to_string()));
        }
    }
    params
}

impl ApiClient {
    // ===== Commitments =====

    pub async fn list_commitments(&self, query: &CommitmentQuery) -> Result<Page<Commitment>, ApiError> {
        self.get_required(&["commitments"], &query.params()).await
    }

    /// Create a commitment; returns the server's copy when it sends one back
    pub async fn create_commitment(&self, commitment: &Commitment) -> Result<Option<Commitment>, ApiError> {
        self.post("/commitments", commitment).await
    }

    pub async fn update_commitment(&self, commitment: &Commitment) -> Result<Option<Commitment>, ApiError> {
        self.put("/commitments", commitment).await
    }

    pub async fn delete_commitment(&self, id: &str) -> Result<(), ApiError> {
        self.delete_at(&["commitments", id]).await
    }

    // ===== Tasks =====

    pub async fn list_tasks(&self, commitment_id: &str) -> Result<Vec<Task>, ApiError> {
        let url = self.endpoint_url(&["commitments", commitment_id, "tasks"], &[])?;
        Ok(self.fetch_url(Method::GET, url, None, None).await?.unwrap_or_default())
    }

    pub async fn create_task(&self, commitment_id: &str, task: &Task) -> Result<Option<Task>, ApiError> {
        let url = self.endpoint_url(&["commitments", commitment_id, "tasks"], &[])?;
        self.send_json(Method::POST, url, task).await
    }

    pub async fn update_task(&self, commitment_id: &str, task: &Task) -> Result<Option<Task>, ApiError> {
        let url = self.endpoint_url(&["commitments", commitment_id, "tasks"], &[])?;
        self.send_json(Method::PUT, url, task).await
    }

    pub async fn delete_task(&self, commitment_id: &str, task_id: &str) -> Result<(), ApiError> {
        self.delete_at(&["commitments", commitment_id, "tasks", task_id]).await
    }

    // ===== Users & roles =====

    /// The signed-in user
    pub async fn me(&self) -> Result<User, ApiError> {
        required(self.get("/users/me").await?, "/users/me")
    }

    pub async fn list_users(&self, page: u32, size: u32, search: Option<&str>) -> Result<Page<User>, ApiError> {
        self.get_required(&["users"], &paged(page, size, &[("search", search)])).await
    }

    pub async fn list_roles(&self, page: u32, size: u32) -> Result<Page<Role>, ApiError> {
        self.get_required(&["roles"], &paged(page, size, &[])).await
    }

    /// Roles held by one user
    pub async fn user_roles(&self, page: u32, size: u32, user_id: &str) -> Result<Vec<Role>, ApiError> {
        let page: Page<Role> = self
            .get_required(&["roles"], &paged(page, size, &[("userId", Some(user_id))]))
            .await?;
        Ok(page.content)
    }

    pub async fn update_role(&self, role: &Role) -> Result<Option<Role>, ApiError> {
        self.put("/roles", role).await
    }

    /// Whether the signed-in user holds the admin role
    pub async fn is_admin(&self) -> Result<bool, ApiError> {
        let me = self.me().await?;
        let Some(user_id) = me.id else {
            return Err(ApiError::InvalidResponse("/users/me: user has no id".into()));
        };
        let roles = self.user_roles(0, 20, &user_id).await?;
        Ok(roles.iter().any(Role::is_admin))
    }

    // ===== Statuses & categories =====

    pub async fn list_statuses(&self) -> Result<Vec<Status>, ApiError> {
        Ok(self.get("/statuses").await?.unwrap_or_default())
    }

    pub async fn create_status(&self, status: &Status) -> Result<Status, ApiError> {
        required(self.post("/statuses", status).await?, "/statuses")
    }

    pub async fn update_status(&self, status: &Status) -> Result<Option<Status>, ApiError> {
        self.put("/statuses", status).await
    }

    pub async fn delete_status(&self, id: &str) -> Result<(), ApiError> {
        self.delete_at(&["statuses", id]).await
    }

    pub async fn list_categories(&self) -> Result<Vec<CommitmentCategory>, ApiError> {
        Ok(self.get("/commitment-categories").await?.unwrap_or_default())
    }

    // ===== Notifications =====

    pub async fn list_notifications(
        &self,
        commitment_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<Notification>, ApiError> {
        let query = paged(page, size, &[("commitmentId", Some(commitment_id))]);
        self.get_required(&["notifications"], &query).await
    }

    /// Invitations sent to guests, optionally only those for one user
    pub async fn list_invitations(
        &self,
        page: u32,
        size: u32,
        user_id: Option<&str>,
    ) -> Result<Page<NotificationInvitation>, ApiError> {
        let query = paged(page, size, &[("userId", user_id)]);
        self.get_required(&["guest", "notifications"], &query).await
    }

    pub async fn create_invitation(
        &self,
        invitation: &NotificationInvitation,
    ) -> Result<Option<NotificationInvitation>, ApiError> {
        self.post("/guest/notifications", invitation).await
    }

    // ===== Reports =====

    pub async fn create_report(&self, request: &ReportRequest) -> Result<Report, ApiError> {
        required(self.post("/users/report", request).await?, "/users/report")
    }

    // ===== Helpers =====

    async fn get_required<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.endpoint_url(segments, query)?;
        let path = url.path().to_string();
        required(self.fetch_url(Method::GET, url, None, None).await?, &path)
    }

    async fn delete_at(&self, segments: &[&str]) -> Result<(), ApiError> {
        let url = self.endpoint_url(segments, &[])?;
        self.fetch_url::<Value>(Method::DELETE, url, None, None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, TokenPair};
    use chrono::{TimeZone, Utc};
    use mockito::{Matcher, Server};
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;

    fn api_for(url: &str) -> ApiClient {
        let store = MemoryCredentialStore::with_tokens(
            TokenPair::new("AT1", "RT1").expect("valid test pair"),
        );
        ApiClient::new(Client::new(), url, Arc::new(store))
    }

    #[test]
    fn test_commitment_query_params() {
        let mut query = CommitmentQuery::new(0, 10);
        assert_eq!(
            query.params(),
            vec![("page", "0".to_string()), ("size", "10".to_string())]
        );

        query.user_id = Some("u 1".to_string());
        query.status_id = Some(String::new());
        query.category_id = Some("k1".to_string());
        assert_eq!(
            query.params(),
            vec![
                ("page", "0".to_string()),
                ("size", "10".to_string()),
                ("userId", "u 1".to_string()),
                ("commitmentCategoryId", "k1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_filters_and_ids_are_url_encoded() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/users")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "0".into()),
                Matcher::UrlEncoded("search".into(), "Ada & co".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[],"totalPages":0,"totalElements":0,"size":10,"number":0}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/statuses/in%20review")
            .with_status(204)
            .create_async()
            .await;

        let api = api_for(&server.url());
        let page = api.list_users(0, DEFAULT_PAGE_SIZE, Some("Ada & co")).await.unwrap();
        assert!(page.content.is_empty());
        api.delete_status("in review").await.unwrap();

        list.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_commitments() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/commitments")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("size".into(), "5".into()),
                Matcher::UrlEncoded("statusId".into(), "s1".into()),
            ]))
            .match_header("authorization", "Bearer AT1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"id":"c1","title":"Dentist","description":""}],"totalPages":3,"totalElements":11,"size":5,"number":1}"#)
            .create_async()
            .await;

        let api = api_for(&server.url());
        let query = CommitmentQuery {
            status_id: Some("s1".to_string()),
            ..CommitmentQuery::new(1, 5)
        };
        let page = api.list_commitments(&query).await.expect("list should succeed");

        mock.assert_async().await;
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].title, "Dentist");
        assert_eq!(page.total_elements, 11);
    }

    #[tokio::test]
    async fn test_task_crud_paths() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/commitments/c1/tasks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"t1","title":"Book slot","description":""}]"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/commitments/c1/tasks")
            .match_body(Matcher::PartialJson(json!({ "id": "t1", "title": "Book earlier slot" })))
            .with_status(204)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/commitments/c1/tasks/t1")
            .with_status(204)
            .create_async()
            .await;

        let api = api_for(&server.url());
        let mut tasks = api.list_tasks("c1").await.unwrap();
        assert_eq!(tasks.len(), 1);

        let mut task = tasks.remove(0);
        task.title = "Book earlier slot".to_string();
        assert!(api.update_task("c1", &task).await.unwrap().is_none());
        api.delete_task("c1", "t1").await.unwrap();

        list.assert_async().await;
        update.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_me_requires_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/me")
            .with_status(204)
            .create_async()
            .await;

        let api = api_for(&server.url());
        let err = api.me().await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_is_admin() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/me")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"u1","firstName":"Ada","lastName":"Lovelace","email":"ada@example.com"}"#)
            .create_async()
            .await;
        let roles = server
            .mock("GET", "/roles")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "0".into()),
                Matcher::UrlEncoded("size".into(), "20".into()),
                Matcher::UrlEncoded("userId".into(), "u1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"id":"r1","name":"USER","description":""},{"id":"r2","name":"ADMIN","description":""}],"totalPages":1,"totalElements":2,"size":20,"number":0}"#)
            .create_async()
            .await;

        let api = api_for(&server.url());
        assert!(api.is_admin().await.unwrap());
        roles.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_report() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/users/report")
            .match_body(Matcher::Json(json!({
                "userId": "u1",
                "startDate": "2024-01-01T00:00:00Z",
                "endDate": "2024-02-01T00:00:00Z"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"completedCommitments":[],"completedTasks":[{"id":"t1","title":"Done"}]}"#)
            .create_async()
            .await;

        let api = api_for(&server.url());
        let request = ReportRequest {
            user_id: "u1".to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        };
        let report = api.create_report(&request).await.expect("report should succeed");

        mock.assert_async().await;
        assert_eq!(report.completed_tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_list_invitations_for_user() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/guest/notifications")
            .match_query(Matcher::UrlEncoded("userId".into(), "u2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"id":"i1","status":{"id":"s1","name":"PENDING","description":""}}],"totalPages":1,"totalElements":1,"size":10,"number":0}"#)
            .create_async()
            .await;

        let api = api_for(&server.url());
        let page = api
            .list_invitations(0, DEFAULT_PAGE_SIZE, Some("u2"))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(page.content[0].id.as_deref(), Some("i1"));
    }
}
