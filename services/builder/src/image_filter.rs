//! Base image resolution by search filter.
//!
//! Images are listed newest first. Without a display name pattern the first
//! image of the first non-empty page wins; with one, the first image whose
//! display name matches wins, following pages until one does.

use regex::Regex;
use smith_id::ImageId;
use smith_reconcile::{CallContext, CallExecutor};
use tracing::{debug, info};

use crate::compute::{ops, ComputeService, Image, ListImagesRequest};
use crate::config::BaseImageFilter;
use crate::error::{DriverError, SelectionError};

const AVAILABLE: &str = "AVAILABLE";
const SORT_BY_TIME_CREATED: &str = "TIMECREATED";
const SORT_DESCENDING: &str = "DESC";

/// First-page listing request for `filter`.
pub fn list_request(filter: &BaseImageFilter) -> ListImagesRequest {
    ListImagesRequest {
        compartment_id: filter.compartment_id.clone(),
        display_name: filter.display_name.clone(),
        operating_system: filter.operating_system.clone(),
        operating_system_version: filter.operating_system_version.clone(),
        shape: filter.shape.clone(),
        lifecycle_state: Some(AVAILABLE.to_string()),
        sort_by: Some(SORT_BY_TIME_CREATED.to_string()),
        sort_order: Some(SORT_DESCENDING.to_string()),
        page: None,
    }
}

/// Compiled display name pattern with its source text.
struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    fn compile(source: &str) -> Result<Self, SelectionError> {
        Regex::new(source)
            .map(|regex| Self {
                source: source.to_string(),
                regex,
            })
            .map_err(|e| SelectionError::InvalidPattern {
                pattern: source.to_string(),
                source: e,
            })
    }

    fn first_match<'a>(&self, images: &'a [Image]) -> Option<&'a Image> {
        images.iter().find(|image| {
            image
                .display_name
                .as_deref()
                .is_some_and(|name| self.regex.is_match(name))
        })
    }
}

/// Resolve the most recent image matching `filter`.
pub async fn find_base_image(
    compute: &dyn ComputeService,
    executor: &CallExecutor,
    ctx: &CallContext,
    filter: &BaseImageFilter,
) -> Result<ImageId, DriverError> {
    let pattern = filter
        .display_name_search
        .as_deref()
        .map(NamePattern::compile)
        .transpose()?;

    let mut request = list_request(filter);
    let mut pages: u32 = 0;

    loop {
        let page = executor
            .execute(ctx, ops::LIST_IMAGES, || compute.list_images(&request))
            .await?;
        pages += 1;

        if pages == 1 && page.items.is_empty() && page.next_page.is_none() {
            return Err(SelectionError::NoImages.into());
        }

        debug!(
            page = pages,
            items = page.items.len(),
            has_next = page.next_page.is_some(),
            "Listed base image candidates"
        );

        let found = match &pattern {
            Some(pattern) => pattern.first_match(&page.items),
            None => page.items.first(),
        };
        if let Some(image) = found {
            info!(
                image_id = %image.id,
                display_name = image.display_name.as_deref().unwrap_or_default(),
                pages,
                "Resolved base image"
            );
            return Ok(image.id.clone());
        }

        match page.next_page {
            Some(next) => request.page = Some(next),
            None => {
                return Err(match pattern {
                    Some(pattern) => SelectionError::NoMatch {
                        pattern: pattern.source,
                    },
                    None => SelectionError::NoImages,
                }
                .into())
            }
        }
    }
}
