// Process instance store - create / get / partial-merge update keyed by instance id

//! # Process Instance Store
//!
//! Thin, typed front over an [`InstanceRepository`]. It turns "no such
//! document" into [`ProcessDeskError::InstanceNotFound`], logs writes, and
//! offers the paged scan helper used by reconciliation audits.
//!
//! `update` never reads the document first. The patch travels to the
//! repository, which merges it atomically, so concurrent callers updating
//! disjoint fields of one instance both win. Two callers writing the same
//! field resolve to whichever write the store observes last, unless the
//! patch carries an expected version.

use std::sync::Arc;
use tracing::{debug, info};

use super::patch::InstancePatch;
use super::storage::{InstanceQuery, InstanceRepository, Page, PageRequest};
use crate::models::{ProcessInstance, ProcessInstanceId};
use crate::{ProcessDeskError, Result};

/// Page size used when scanning every instance matching a query
pub const DEFAULT_PAGE_SIZE: usize = 200;

#[derive(Clone)]
pub struct ProcessInstanceStore {
    repository: Arc<dyn InstanceRepository>,
    page_size: usize,
}

impl ProcessInstanceStore {
    pub fn new(repository: Arc<dyn InstanceRepository>) -> Self {
        Self {
            repository,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the scan page size (zero falls back to the default)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    pub async fn create(&self, instance: ProcessInstance) -> Result<ProcessInstance> {
        let saved = self.repository.save(instance).await?;
        info!(
            instance_id = %saved.process_instance_id,
            process = %saved.process_definition_key,
            "created process instance"
        );
        Ok(saved)
    }

    pub async fn get(&self, id: &ProcessInstanceId) -> Result<ProcessInstance> {
        self.repository
            .find_one(id)
            .await?
            .ok_or_else(|| ProcessDeskError::InstanceNotFound { id: id.to_string() })
    }

    /// Apply `patch` as one atomic merge and return the merged document
    pub async fn update(
        &self,
        id: &ProcessInstanceId,
        patch: &InstancePatch,
    ) -> Result<ProcessInstance> {
        if patch.is_empty() && patch.expected_version.is_none() {
            debug!(instance_id = %id, "empty patch, reading current document");
            return self.get(id).await;
        }
        self.repository
            .update(id, patch)
            .await?
            .ok_or_else(|| ProcessDeskError::InstanceNotFound { id: id.to_string() })
    }

    pub async fn find_page(
        &self,
        query: &InstanceQuery,
        page: PageRequest,
    ) -> Result<Page<ProcessInstance>> {
        self.repository.find_page(query, page).await
    }

    /// Every instance matching `query`, fetched page by page
    pub async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ProcessInstance>> {
        let mut results = Vec::new();
        let mut request = Some(PageRequest::first(self.page_size));

        while let Some(page_request) = request {
            let page = self.repository.find_page(query, page_request).await?;
            request = page.next_page();
            results.extend(page.items);
        }

        debug!(matches = results.len(), "scanned process instances");
        Ok(results)
    }
}
