//! HTTP implementation of [`TaskService`] against the service's external API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Member, MemberId, Task, TaskId};
use crate::service::{TaskService, TaskUpdate};

const API_PREFIX: &str = "/eapi/v1";

#[derive(Debug, Clone)]
pub struct HttpTaskService {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpTaskService {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "server.url must be an http(s) URL, got '{base_url}'"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let url = config
            .server
            .url
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("server.url is not set".to_string()))?;
        Self::new(
            url,
            config.api_token(),
            Duration::from_secs(config.server.timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{API_PREFIX}{path}", self.base_url);
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.header("secretkey", token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!(
                "{what} failed with {status}: {}",
                body.trim()
            )));
        }
        let value: Value = response.json().await?;
        debug!(what, "task service call succeeded");
        Ok(serde_json::from_value(unwrap_res(value))?)
    }
}

/// Some endpoints wrap their payload as `{"res": ...}`.
fn unwrap_res(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("res") => {
            map.remove("res").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn get_tasks(&self) -> Result<Vec<Task>> {
        let tasks: Option<Vec<Task>> = self
            .send(self.request(Method::GET, "/chore"), "list tasks")
            .await?;
        Ok(tasks.unwrap_or_default())
    }

    async fn get_members(&self) -> Result<Vec<Member>> {
        let members: Option<Vec<Member>> = self
            .send(self.request(Method::GET, "/circle/members"), "list members")
            .await?;
        Ok(members.unwrap_or_default())
    }

    async fn complete_task(&self, id: TaskId, completed_by: Option<MemberId>) -> Result<Task> {
        let mut builder = self.request(Method::POST, &format!("/chore/{id}/complete"));
        if let Some(member) = completed_by {
            builder = builder.query(&[("completedBy", member)]);
        }
        self.send(builder, "complete task").await
    }

    async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        if update.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "update for task {id} changes nothing"
            )));
        }
        let builder = self
            .request(Method::PUT, &format!("/chore/{id}"))
            .json(&update);
        self.send(builder, "update task").await
    }
}
