//! Booru shared (e.g. protocol) code
//!
//! This crate contains code shared between the booru server and any client.  It consists of the
//! [serde](https://crates.io/crates/serde)-enabled structs and enums which define the HTTP API, plus the
//! `tag_expression` submodule, which defines the tag query language (tokenizer, parser, and expression tree)
//! used to filter images by tag using boolean algebra (AND, OR, NOT, wildcards, and the `untagged` keyword).

#![deny(warnings)]

use {
    anyhow::{anyhow, Error},
    serde_derive::{Deserialize, Serialize},
    std::{
        fmt::{self, Display},
        str::FromStr,
    },
    tag_expression::{Tag, TagCategory},
};

pub mod tag_expression;

/// Represents the query string of a GET /api/images request
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ImagesQuery {
    /// Raw tag query, e.g. "sunset, artist:someone, -(red | blue)"
    ///
    /// Absent or unparseable queries match every image.
    pub q: Option<String>,

    /// 1-indexed page to return
    pub page: Option<u32>,

    /// Maximum number of images per page
    pub limit: Option<u32>,
}

/// Metadata for a single image in a search result
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct ImageSummary {
    pub id: i64,

    /// Path of the stored file relative to the media root, e.g. "ab/cd/abcd1234....jpg"
    pub filename: String,

    /// All tags attached to this image, sorted by (category, name)
    pub tags: Vec<Tag>,
}

/// Represents the response to a GET /api/images request
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ImagesResponse {
    pub images: Vec<ImageSummary>,

    /// The page actually returned (1-indexed)
    pub page: u32,

    /// The page size actually used
    pub limit: u32,

    /// Total number of images matching the query, across all pages
    pub total: u32,

    /// Whether pages beyond this one exist
    pub has_more: bool,
}

/// The kind of mutation a batch tag operation applies to each target image
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    /// Attach the requested tags, leaving existing tags alone
    Add,

    /// Detach the requested tags where present
    Remove,

    /// Make the requested tags the image's entire tag set
    Replace,
}

impl FromStr for BatchAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "replace" => Self::Replace,
            _ => return Err(anyhow!("unrecognized batch action: {s}")),
        })
    }
}

impl Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        })
    }
}

/// Represents the body of a POST /api/images/batch_tag request
#[derive(Serialize, Deserialize, Debug)]
pub struct BatchTagRequest {
    /// Images to mutate; must be non-empty
    pub image_ids: Vec<i64>,

    pub action: BatchAction,

    /// Comma-separated, possibly category-prefixed tag names
    ///
    /// Must be non-empty for `add` and `remove`; may be empty for `replace` (replace with nothing clears all
    /// tags).
    pub tags: String,
}

/// Represents the response to a POST /api/images/batch_tag request
#[derive(Serialize, Deserialize, Debug)]
pub struct BatchTagResponse {
    /// Number of images whose tag set actually changed
    pub affected: u32,

    /// Number of targeted images for which the operation was a no-op
    pub skipped: u32,

    /// Whether the operation may be undone
    ///
    /// False when persisting the undo record failed; the mutation itself still succeeded.
    pub undo_available: bool,

    pub message: String,
}

/// Represents the response to a POST /api/images/batch_undo request
#[derive(Serialize, Deserialize, Debug)]
pub struct UndoResponse {
    /// False when there was no recorded operation to undo (a no-op, not an error)
    pub undone: bool,

    /// Number of images whose tags were restored
    pub restored: u32,

    pub message: String,
}

/// Represents the body of a POST /api/images/batch_delete request
#[derive(Serialize, Deserialize, Debug)]
pub struct BatchDeleteRequest {
    pub image_ids: Vec<i64>,
}

/// Represents the body of a PUT /api/image/{id}/tags request, replacing the image's entire tag set
#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateTagsRequest {
    pub tags: Vec<String>,
}

/// Represents the response to a PUT /api/image/{id}/tags request
#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateTagsResponse {
    pub message: String,

    /// The image's tag set after the update, sorted by (category, name)
    pub tags: Vec<Tag>,
}

/// A tag together with its usage count
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct TagSummary {
    pub id: i64,
    pub name: String,
    pub category: TagCategory,

    /// Number of images currently carrying this tag
    pub count: u32,
}

/// Represents the response to a GET /api/tags/summary request
#[derive(Serialize, Deserialize, Debug)]
pub struct TagsSummaryResponse {
    /// All tags with their usage counts, sorted by (category, name)
    pub tags: Vec<TagSummary>,

    /// Number of images with no tags at all
    pub untagged_count: u32,
}

/// Sort order for GET /api/tags/search results
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TagSort {
    Name,
    Count,
}

impl Default for TagSort {
    fn default() -> Self {
        Self::Name
    }
}

/// Represents the query string of a GET /api/tags/search request
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TagsSearchQuery {
    /// Substring to match against tag names, optionally category-prefixed
    pub q: Option<String>,

    /// Restrict results to tags with no image associations
    #[serde(default)]
    pub orphans_only: bool,

    #[serde(default)]
    pub sort_by: TagSort,

    pub page: Option<u32>,

    pub limit: Option<u32>,
}

/// Represents the response to a GET /api/tags/search request
#[derive(Serialize, Deserialize, Debug)]
pub struct TagsSearchResponse {
    pub tags: Vec<TagSummary>,
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub has_more: bool,
}

/// Represents the query string of a GET /api/tags/autocomplete request
#[derive(Serialize, Deserialize, Debug)]
pub struct AutocompleteQuery {
    /// Prefix typed so far, optionally category-qualified
    pub q: String,

    pub limit: Option<u32>,
}

/// Represents the query string of a GET /api/tags/recent request
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct RecentTagsQuery {
    pub limit: Option<u32>,
}

/// Represents the body of a POST /api/tags/rename/{id} request
#[derive(Serialize, Deserialize, Debug)]
pub struct RenameTagRequest {
    pub new_name: String,
}

/// Represents the body of a POST /api/tags/change_category/{id} request
#[derive(Serialize, Deserialize, Debug)]
pub struct ChangeCategoryRequest {
    pub new_category: TagCategory,
}

/// Represents the body of a POST /api/tags/merge request
#[derive(Serialize, Deserialize, Debug)]
pub struct MergeTagsRequest {
    /// The surviving tag; acquires all of the other tag's image associations
    pub keep_id: i64,

    /// The tag deleted by the merge
    pub delete_id: i64,
}

/// Represents the body of a POST /api/upload_from_url request, importing an image by direct URL
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadFromUrlRequest {
    /// URL of the image to download
    pub url: String,

    /// Tags to attach if the image is new; ignored for duplicates
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Represents the response to a POST /api/upload request
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    /// Number of files stored as new images
    pub uploaded: u32,

    /// Number of files skipped because an identical image already exists
    pub duplicates: u32,

    /// Number of files which could not be processed
    pub failed: u32,

    pub message: String,
}

/// Generic response carrying only a human-readable message
#[derive(Serialize, Deserialize, Debug)]
pub struct ActionMessage {
    pub message: String,
}
