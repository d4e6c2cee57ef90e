//! Control plane API client for the node agent.
//!
//! Thin wrapper over the object API: register and update this node,
//! and list/watch the workloads bound to it. Watches stream
//! newline-delimited JSON events.

use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use keel_api::{NodeSpec, Object, WatchEvent};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::Config;

/// Control plane API client.
pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    node_name: String,
}

/// Wire shape of a list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    pub items: Vec<Object>,
    pub resource_version: u64,
}

impl ControlPlaneClient {
    /// Create a new control plane client.
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.control_plane_url.clone(),
            node_name: config.node_name.clone(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Register this node, or fetch it if it already exists.
    pub async fn register_node(&self, spec: NodeSpec) -> Result<Object> {
        let url = format!("{}/v1/nodes", self.base_url);
        let node = Object::node(self.node_name.clone(), spec);

        let response = self.client.post(&url).json(&node).send().await?;
        match response.status() {
            StatusCode::CREATED => {
                debug!(node = %self.node_name, "Node registered");
                Ok(response.json().await?)
            }
            StatusCode::CONFLICT => {
                debug!(node = %self.node_name, "Node already registered");
                self.get_node().await
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Node registration failed");
                anyhow::bail!("Failed to register node: {} - {}", status, body)
            }
        }
    }

    /// Fetch this node's current object.
    pub async fn get_node(&self) -> Result<Object> {
        let url = format!("{}/v1/nodes/{}", self.base_url, self.node_name);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch node: {} - {}", status, body);
        }
        Ok(response.json().await?)
    }

    /// Write this node's object back (status updates, heartbeats).
    pub async fn update_node(&self, node: &Object) -> Result<Object> {
        let url = format!("{}/v1/nodes/{}", self.base_url, self.node_name);
        let response = self.client.put(&url).json(node).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to update node: {} - {}", status, body);
        }
        Ok(response.json().await?)
    }

    /// List the workloads bound to this node, across all namespaces.
    /// Returns the snapshot and the version to resume a watch from.
    pub async fn list_bound_workloads(&self) -> Result<ObjectList> {
        let url = format!(
            "{}/v1/workloads?nodeName={}",
            self.base_url, self.node_name
        );
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to list workloads: {} - {}", status, body);
        }

        let list: ObjectList = response.json().await?;
        debug!(
            count = list.items.len(),
            resource_version = list.resource_version,
            "Listed bound workloads"
        );
        Ok(list)
    }

    /// Open a watch on this node's workloads from the given version.
    pub async fn watch_bound_workloads(&self, from_version: u64) -> Result<WatchConnection> {
        let url = format!(
            "{}/v1/workloads?watch=true&nodeName={}&resourceVersion={}",
            self.base_url, self.node_name, from_version
        );
        debug!(url = %url, "Opening workload watch");

        // Watches are long-lived; the default request timeout would
        // kill them.
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(24 * 3600))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to open watch: {} - {}", status, body);
        }

        Ok(WatchConnection::new(response.bytes_stream()))
    }

    /// Write a workload back (status transitions, finalizer removal).
    pub async fn update_workload(&self, workload: &Object) -> Result<Object> {
        let url = format!(
            "{}/v1/namespaces/{}/workloads/{}",
            self.base_url, workload.metadata.namespace, workload.metadata.name
        );
        let response = self.client.put(&url).json(workload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to update workload: {} - {}", status, body);
        }
        Ok(response.json().await?)
    }
}

/// A live watch: reassembles ndjson lines from the response body.
pub struct WatchConnection {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
}

impl WatchConnection {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
        }
    }

    /// Next event, or `None` when the server ends the stream.
    pub async fn next_event(&mut self) -> Result<Option<WatchEvent>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(serde_json::from_slice(line)?));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_api::{WatchEventType, WorkloadSpec};

    fn line_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = reqwest::Result<Bytes>> + Send {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    #[tokio::test]
    async fn reassembles_events_across_chunk_boundaries() {
        let event = WatchEvent::added(
            Object::workload("default", "w-1", WorkloadSpec::default()),
            3,
        );
        let mut line = serde_json::to_vec(&event).unwrap();
        line.push(b'\n');
        let line: &'static [u8] = Box::leak(line.into_boxed_slice());

        // Split mid-line to force buffering.
        let (a, b) = line.split_at(10);
        let mut conn = WatchConnection::new(line_stream(vec![a, b]));

        let got = conn.next_event().await.unwrap().unwrap();
        assert_eq!(got.event_type, WatchEventType::Added);
        assert_eq!(got.resource_version, 3);
        assert!(conn.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multiple_events_in_one_chunk() {
        let mut payload = Vec::new();
        for (name, rv) in [("w-1", 1u64), ("w-2", 2)] {
            let event =
                WatchEvent::added(Object::workload("default", name, WorkloadSpec::default()), rv);
            payload.extend(serde_json::to_vec(&event).unwrap());
            payload.push(b'\n');
        }
        let payload: &'static [u8] = Box::leak(payload.into_boxed_slice());

        let mut conn = WatchConnection::new(line_stream(vec![payload]));
        assert_eq!(conn.next_event().await.unwrap().unwrap().resource_version, 1);
        assert_eq!(conn.next_event().await.unwrap().unwrap().resource_version, 2);
        assert!(conn.next_event().await.unwrap().is_none());
    }
}
