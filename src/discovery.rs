use anyhow::Result;
use aws_sdk_resourcegroupstagging::types::TagFilter;
use aws_sdk_resourcegroupstagging::Client;
use tracing::debug;

use crate::tags::{tag_pairs_to_map, RequiredTags, TAG_ENVIRONMENT};

/// Query the AWS Resource Groups Tagging API for resources of the given type
/// that carry the full required tag set.
///
/// The environment tag is filtered server-side; the complete tag set is then
/// verified per resource, so a resource tagged with the right environment but
/// the wrong project or manager is still excluded.
///
/// Handles pagination automatically to retrieve all results.
///
/// Returns the ARNs of matching resources.
pub async fn find_tagged_resources(
    client: &Client,
    resource_type: &str,
    required: &RequiredTags,
) -> Result<Vec<String>> {
    let mut arns = Vec::new();

    let environment = required
        .as_map()
        .get(TAG_ENVIRONMENT)
        .cloned()
        .unwrap_or_default();
    let tag_filter = TagFilter::builder()
        .key(TAG_ENVIRONMENT)
        .values(environment)
        .build();

    let mut pagination_token: Option<String> = None;

    loop {
        let mut request = client
            .get_resources()
            .tag_filters(tag_filter.clone())
            .resource_type_filters(resource_type);

        if let Some(ref token) = pagination_token {
            request = request.pagination_token(token);
        }

        let response = request.send().await?;

        for mapping in response.resource_tag_mapping_list() {
            let Some(arn) = mapping.resource_arn() else {
                continue;
            };
            let tags = tag_pairs_to_map(
                mapping
                    .tags()
                    .iter()
                    .map(|tag| (Some(tag.key()), Some(tag.value()))),
            );
            if required.matches(&tags) {
                arns.push(arn.to_string());
            } else {
                debug!(arn = %arn, "Skipping resource without the full required tag set");
            }
        }

        match response.pagination_token() {
            Some(token) if !token.is_empty() => {
                pagination_token = Some(token.to_string());
            }
            _ => break,
        }
    }

    Ok(arns)
}
