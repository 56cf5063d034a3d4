//! Rendered compliance documents returned by the external renderer.

use serde::{Deserialize, Serialize};

/// URLs and fetched content of a rendered invoice.
///
/// Content is optional: a failed fetch keeps the URL but not the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentArtifacts {
    pub pdf_url: String,
    pub xml_url: String,
    /// Base64 of the PDF bytes.
    pub pdf_content: Option<String>,
    pub xml_content: Option<String>,
}
