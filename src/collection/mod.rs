//! Paginated, client-side filterable listing of server records.
//!
//! The server paginates *before* any client predicate runs, so one logical
//! page may span several raw pages. [`Collection`] requests raw batches one at
//! a time, filters them, and stitches together a logical page of exactly
//! `page_limit` records while tracking how many *raw* records it consumed.
//! Nothing is committed until the whole logical page is assembled: a failed
//! request, or a future dropped mid-fetch, leaves the collection untouched.

mod offset_stack;
mod window;

pub use offset_stack::OffsetStack;
pub use window::{FilterFn, PageExtension, PageWindow, Params, SortDir};

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::context::AppContext;
use crate::events::CollectionEvent;
use crate::http::{ApiRequest, HttpError};
use crate::models::Record;

/// Default number of records per logical page.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Default sort field.
pub const DEFAULT_SORT_FIELD: &str = "name";

/// Errors from fetching a collection.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("collection has neither a resource name nor an alternate url")]
    NoResource,
    /// A raw listing request failed; the in-progress page was discarded.
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// A paginated view over a listing endpoint.
pub struct Collection {
    ctx: AppContext,
    resource_name: Option<String>,
    alt_url: Option<String>,
    page_limit: usize,
    sort_field: String,
    sort_dir: SortDir,
    append: bool,
    filter: Option<FilterFn>,
    extensions: Vec<Arc<dyn PageExtension>>,
    params: Params,
    records: Vec<Record>,
    offset: usize,
    offset_stack: OffsetStack,
    has_more_pages: bool,
}

impl Collection {
    /// Collection listing `GET <resource_name>`.
    pub fn new(ctx: AppContext, resource_name: &str) -> Self {
        Self {
            ctx,
            resource_name: Some(resource_name.to_string()),
            alt_url: None,
            page_limit: DEFAULT_PAGE_LIMIT,
            sort_field: DEFAULT_SORT_FIELD.to_string(),
            sort_dir: SortDir::Ascending,
            append: false,
            filter: None,
            extensions: Vec::new(),
            params: Params::new(),
            records: Vec::new(),
            offset: 0,
            offset_stack: OffsetStack::default(),
            has_more_pages: false,
        }
    }

    /// Use `url` for listing instead of the resource name.
    pub fn alt_url(mut self, url: &str) -> Self {
        self.alt_url = Some(url.to_string());
        self
    }

    /// Records per logical page; 0 fetches everything in one request.
    pub fn page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn sort(mut self, field: &str, dir: SortDir) -> Self {
        self.sort_field = field.to_string();
        self.sort_dir = dir;
        self
    }

    /// Append each fetched page to the visible records instead of replacing them.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Keep only records matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Register a page extension. Extensions run in registration order.
    pub fn extension(mut self, extension: Arc<dyn PageExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw records consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.page_limit
    }

    /// Parameters of the most recent successful fetch.
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn offset_stack(&self) -> &OffsetStack {
        &self.offset_stack
    }

    pub fn has_next_page(&self) -> bool {
        self.has_more_pages
    }

    pub fn has_previous_page(&self) -> bool {
        if self.tracks_pages() {
            self.page_num() > 0
        } else {
            self.offset > self.records.len()
        }
    }

    /// Zero-based index of the current page. Negative means no current page.
    pub fn page_num(&self) -> i64 {
        if self.tracks_pages() {
            return self.offset_stack.depth() as i64 - 1;
        }
        if self.page_limit == 0 {
            return 0;
        }
        let consumed = self.offset as i64 - self.records.len() as i64;
        let limit = self.page_limit as i64;
        consumed.div_euclid(limit) + i64::from(consumed.rem_euclid(limit) != 0)
    }

    pub fn window(&self) -> PageWindow<'_> {
        PageWindow {
            records: &self.records,
            offset: self.offset,
            has_next_page: self.has_next_page(),
            has_previous_page: self.has_previous_page(),
            page_num: self.page_num(),
        }
    }

    /// Forget every fetched record and page boundary.
    pub fn reset(&mut self) {
        self.records.clear();
        self.offset = 0;
        self.offset_stack.clear();
        self.params.clear();
        self.has_more_pages = false;
    }

    /// Fetch the next logical page at the current offset.
    ///
    /// With `reset`, numbering restarts at raw offset 0 and the page
    /// boundaries recorded so far are dropped.
    pub async fn fetch(&mut self, params: Params, reset: bool) -> Result<(), FetchError> {
        let (start, stack) = if reset {
            (0, OffsetStack::default())
        } else {
            (self.offset, self.offset_stack.clone())
        };
        self.fetch_from(start, stack, params, reset).await
    }

    /// Fetch the page after the current one, merging `params` into the stored ones.
    pub async fn fetch_next_page(&mut self, params: Params) -> Result<(), FetchError> {
        let params = self.merged_params(params);
        self.fetch(params, false).await
    }

    /// Fetch the page before the current one, merging `params` into the stored ones.
    pub async fn fetch_previous_page(&mut self, params: Params) -> Result<(), FetchError> {
        let params = self.merged_params(params);
        if self.tracks_pages() {
            let mut stack = self.offset_stack.clone();
            // Current page, then the page before it.
            stack.pop();
            let target = stack.pop().unwrap_or(0);
            self.fetch_from(target, stack, params, false).await
        } else {
            let target = self
                .offset
                .saturating_sub(self.records.len() + self.page_limit);
            let stack = self.offset_stack.clone();
            self.fetch_from(target, stack, params, false).await
        }
    }

    /// Whether page boundaries are recorded for exact backward navigation.
    fn tracks_pages(&self) -> bool {
        self.filter.is_some() && !self.append
    }

    fn merged_params(&self, params: Params) -> Params {
        let mut merged = self.params.clone();
        merged.extend(params);
        merged
    }

    fn url(&self) -> Result<&str, FetchError> {
        self.alt_url
            .as_deref()
            .or(self.resource_name.as_deref())
            .ok_or(FetchError::NoResource)
    }

    async fn fetch_from(
        &mut self,
        start: usize,
        mut stack: OffsetStack,
        params: Params,
        reset: bool,
    ) -> Result<(), FetchError> {
        let url = self.url()?.to_string();
        let page_limit = self.page_limit;
        let raw_limit = if page_limit > 0 { page_limit + 1 } else { 0 };
        let filter = self.filter.clone();

        let mut offset = start;
        let mut final_list: Vec<Record> = Vec::new();
        let mut batches = 0usize;

        let has_more = loop {
            let mut batch = self.fetch_batch(&url, &params, raw_limit, offset).await?;
            batches += 1;

            let mut has_more = page_limit > 0 && batch.len() > page_limit;
            if has_more {
                batch.truncate(page_limit);
            }
            let batch_len = batch.len();

            // Keep each accepted record's index in the raw batch for offset accounting.
            let mut accepted: Vec<(usize, Record)> = match &filter {
                Some(predicate) => batch
                    .into_iter()
                    .enumerate()
                    .filter(|(_, record)| predicate(record))
                    .collect(),
                None => batch.into_iter().enumerate().collect(),
            };

            if page_limit > 0 && final_list.len() + accepted.len() >= page_limit {
                let room = page_limit - final_list.len();
                if accepted.len() > room {
                    accepted.truncate(room);
                    has_more = true;
                }
                offset += match (&filter, accepted.last()) {
                    (Some(_), Some((index, _))) => index + 1,
                    _ => accepted.len(),
                };
                final_list.extend(accepted.into_iter().map(|(_, record)| record));
                break has_more;
            }

            final_list.extend(accepted.into_iter().map(|(_, record)| record));
            // The whole batch was examined, so skip past all of it, accepted or not.
            offset += batch_len;
            if !has_more {
                break false;
            }
        };

        // Commit.
        let count = final_list.len();
        if self.tracks_pages() {
            stack.push(start);
            self.offset_stack = stack;
        } else if reset {
            self.offset_stack.clear();
        }
        if self.append && !reset {
            self.records.extend(final_list);
        } else {
            self.records = final_list;
        }
        self.offset = offset;
        self.has_more_pages = has_more;
        self.params = params;

        debug!(
            "{}: committed {} records from {} raw batch(es), offset {} -> {}, more: {}",
            url, count, batches, start, offset, has_more
        );

        if count > 0 || reset {
            self.ctx.events().emit(CollectionEvent::Changed {
                resource: url.clone(),
                count,
                offset,
                reset,
            });
        }

        let window = self.window();
        for extension in &self.extensions {
            extension.page_committed(&url, &window);
        }

        Ok(())
    }

    async fn fetch_batch(
        &self,
        url: &str,
        params: &Params,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>, FetchError> {
        let mut query = Params::new();
        query.insert("sort".to_string(), self.sort_field.clone());
        query.insert("sortdir".to_string(), self.sort_dir.as_param().to_string());
        for (key, value) in params {
            if key != "limit" && key != "offset" {
                query.insert(key.clone(), value.clone());
            }
        }
        query.insert("limit".to_string(), limit.to_string());
        query.insert("offset".to_string(), offset.to_string());

        trace!("{}: raw batch limit={} offset={}", url, limit, offset);
        let response = self
            .ctx
            .transport()
            .send(ApiRequest::get(url).query_pairs(query))
            .await?;
        Ok(response.json()?)
    }
}
