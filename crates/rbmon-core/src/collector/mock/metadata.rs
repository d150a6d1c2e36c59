//! Scripted metadata endpoints for the cloud tier.

use crate::classifier::cloud::{MetadataClient, MetadataResponse};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Recorded request: URL and headers.
pub type MetadataCall = (String, Vec<(String, String)>);

/// Metadata client answering from a URL table; unknown URLs are unreachable.
#[derive(Debug, Default)]
pub struct MockMetadata {
    responses: HashMap<String, MetadataResponse>,
    calls: Mutex<Vec<MetadataCall>>,
}

impl MockMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url: &str, response: MetadataResponse) {
        self.responses.insert(url.to_string(), response);
    }

    pub fn calls(&self) -> Vec<MetadataCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl MetadataClient for MockMetadata {
    fn get(&self, url: &str, headers: &[(&str, &str)], _timeout: Duration) -> Option<MetadataResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
        }
        self.responses.get(url).cloned()
    }
}
