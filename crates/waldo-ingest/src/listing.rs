//! Object listing fetch and parsing
//!
//! The listing is an S3-style `ListBucketResult` document. Only the first
//! page is processed; a truncated listing is reported as a warning.

use quick_xml::events::Event;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info};
use waldo_common::WorkItem;

use crate::error::{ListingFetchError, ListingParseError};

const ROOT_ELEMENT: &str = "ListBucketResult";
const ENTRIES_ELEMENT: &str = "Contents";

#[derive(Debug, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: Option<bool>,

    #[serde(rename = "Contents", default)]
    contents: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(rename = "Key", default)]
    key: Option<String>,
}

/// Parsed listing, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<WorkItem>,
    pub truncated: bool,
}

/// Fetches the raw listing document
#[derive(Debug, Clone)]
pub struct ListingClient {
    client: Client,
}

impl ListingClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GET the listing; anything but a 200 with an XML body is fatal.
    pub async fn fetch(&self, url: &Url) -> Result<String, ListingFetchError> {
        info!(url = %url, "Fetching object listing");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ListingFetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ListingFetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_xml_content_type(&content_type) {
            return Err(ListingFetchError::ContentType {
                url: url.to_string(),
                content_type,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| ListingFetchError::Body {
                url: url.to_string(),
                source,
            })?;
        debug!(bytes = body.len(), "Listing downloaded");
        Ok(body)
    }
}

/// True for `application/xml`, `text/xml` and `application/*+xml`.
pub fn is_xml_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence == "application/xml"
        || essence == "text/xml"
        || (essence.starts_with("application/") && essence.ends_with("+xml"))
}

/// Decode a `ListBucketResult` document into its entry keys.
pub fn parse_listing(xml: &str) -> Result<Listing, ListingParseError> {
    match root_element(xml)? {
        Some(name) if name == ROOT_ELEMENT => {},
        _ => return Err(ListingParseError::MissingContainer(ROOT_ELEMENT)),
    }

    let document: ListBucketResult =
        quick_xml::de::from_str(xml).map_err(|e| ListingParseError::Malformed(e.to_string()))?;

    if document.contents.is_empty() {
        return Err(ListingParseError::MissingContainer(ENTRIES_ELEMENT));
    }

    let items = document
        .contents
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            entry
                .key
                .and_then(|key| WorkItem::new(key).ok())
                .ok_or(ListingParseError::MissingKey { index })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Listing {
        items,
        truncated: document.is_truncated.unwrap_or(false),
    })
}

/// Local name of the first element, ignoring any namespace prefix.
fn root_element(xml: &str) -> Result<Option<String>, ListingParseError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                let name = element.local_name();
                return Ok(Some(String::from_utf8_lossy(name.as_ref()).into_owned()));
            },
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => continue,
            Err(e) => return Err(ListingParseError::Malformed(e.to_string())),
        }
    }
}
