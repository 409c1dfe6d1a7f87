use std::time::Duration;

use reqwest::Client;
use reqwest::header::USER_AGENT;
use veil_core::error::AppError;
use veil_core::traits::{RobotsResponse, RobotsSource};

use crate::fetcher::{build_client, map_reqwest_error};

/// Fetches robots.txt over plain HTTP.
///
/// Any HTTP status is returned as-is; interpreting it is the cache's job.
#[derive(Clone)]
pub struct ReqwestRobotsSource {
    client: Client,
    agent: String,
    timeout: Duration,
}

impl ReqwestRobotsSource {
    pub fn new(agent: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout, None)?,
            agent: agent.into(),
            timeout,
        })
    }

    /// Fetch through an existing client, so robots.txt takes the same route
    /// as the pages it governs.
    pub fn with_client(client: Client, agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            agent: agent.into(),
            timeout,
        }
    }
}

impl RobotsSource for ReqwestRobotsSource {
    async fn fetch_robots(&self, robots_url: &str) -> Result<RobotsResponse, AppError> {
        tracing::debug!(url = %robots_url, "Fetching robots.txt");
        let response = self
            .client
            .get(robots_url)
            .header(USER_AGENT, &self.agent)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        Ok(RobotsResponse { status, body })
    }
}
