//! Linear GraphQL backend for escalation tickets.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{extract_reply, TicketRequest, TicketStatus, TicketSystem};
use crate::message::error::TicketError;

/// Linear's GraphQL endpoint.
pub const LINEAR_API_URL: &str = "https://api.linear.app/graphql";

/// Issue priority used for escalation tickets (high).
const ESCALATION_PRIORITY: u8 = 2;

const CREATE_ISSUE: &str = "mutation IssueCreate($input: IssueCreateInput!) { \
issueCreate(input: $input) { success issue { id identifier } } }";

const ISSUE_COMMENTS: &str = "query IssueComments($id: String!) { \
issue(id: $id) { comments { nodes { body createdAt } } } }";

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    issue_create: IssueCreatePayload,
}

#[derive(Deserialize)]
struct IssueCreatePayload {
    success: bool,
    issue: Option<Issue>,
}

#[derive(Deserialize)]
struct Issue {
    id: String,
    identifier: Option<String>,
}

#[derive(Deserialize)]
struct CommentsData {
    issue: Option<IssueComments>,
}

#[derive(Deserialize)]
struct IssueComments {
    comments: CommentConnection,
}

#[derive(Deserialize)]
struct CommentConnection {
    nodes: Vec<Comment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Comment {
    body: String,
    created_at: String,
}

/// Escalation tickets as Linear issues; replies are read from issue comments.
pub struct LinearTicketSystem {
    client: Client,
    api_key: String,
    team_id: String,
    project_id: Option<String>,
    api_url: String,
}

impl LinearTicketSystem {
    /// Creates a backend filing issues for `team_id`.
    pub fn new(
        api_key: String,
        team_id: String,
        project_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TicketError> {
        if team_id.trim().is_empty() {
            return Err(TicketError::NotConfigured("team id is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TicketError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            team_id,
            project_id,
            api_url: LINEAR_API_URL.to_string(),
        })
    }

    /// Sends requests to a different endpoint.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, TicketError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| TicketError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TicketError::Api(format!("HTTP {status}: {body}")));
        }

        let payload: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| TicketError::InvalidResponse(e.to_string()))?;

        if !payload.errors.is_empty() {
            let messages: Vec<String> = payload.errors.into_iter().map(|e| e.message).collect();
            return Err(TicketError::Api(messages.join("; ")));
        }
        payload
            .data
            .ok_or_else(|| TicketError::InvalidResponse("response has no data".to_string()))
    }
}

impl TicketSystem for LinearTicketSystem {
    fn create_ticket<'a>(
        &'a self,
        request: &'a TicketRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, TicketError>> + Send + 'a>> {
        Box::pin(async move {
            let mut input = json!({
                "title": request.title,
                "description": request.description,
                "teamId": self.team_id,
                "priority": ESCALATION_PRIORITY,
            });
            if let Some(project_id) = &self.project_id {
                input["projectId"] = json!(project_id);
            }

            let data: CreateData = self
                .execute(CREATE_ISSUE, json!({ "input": input }))
                .await?;
            let issue = match data.issue_create {
                IssueCreatePayload {
                    success: true,
                    issue: Some(issue),
                } => issue,
                _ => {
                    return Err(TicketError::Api(
                        "issueCreate reported no issue".to_string(),
                    ))
                }
            };

            info!(
                ticket_id = %issue.id,
                identifier = issue.identifier.as_deref().unwrap_or("-"),
                "Created Linear escalation issue"
            );
            Ok(issue.id)
        })
    }

    fn poll_ticket<'a>(
        &'a self,
        ticket_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TicketStatus, TicketError>> + Send + 'a>> {
        Box::pin(async move {
            let data: CommentsData = self
                .execute(ISSUE_COMMENTS, json!({ "id": ticket_id }))
                .await?;
            let mut comments = data
                .issue
                .ok_or_else(|| TicketError::InvalidResponse(format!("issue {ticket_id} not found")))?
                .comments
                .nodes;
            comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            debug!(ticket_id, comments = comments.len(), "Polled Linear issue");
            let bodies: Vec<&str> = comments.iter().map(|c| c.body.as_str()).collect();
            Ok(match extract_reply(&bodies) {
                Some(message) => TicketStatus::Resolved(message),
                None => TicketStatus::Pending,
            })
        })
    }
}
