//! SharePoint site URL parsing.

use std::fmt;

use crate::error::GraphError;

/// A site reference addressable by Graph as `{host}:/{kind}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRef {
    pub host: String,
    /// Managed path, `sites` or `teams`.
    pub kind: &'static str,
    pub name: String,
}

impl SiteRef {
    /// Parses `https://contoso.sharepoint.com/sites/Finance`.
    ///
    /// A URL without a `sites/` or `teams/` prefix is read as a site under
    /// `sites/` named after its last path segment.
    pub fn parse(site_url: &str) -> Result<Self, GraphError> {
        let url = reqwest::Url::parse(site_url.trim())
            .map_err(|e| GraphError::InvalidSite(format!("{site_url}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GraphError::InvalidSite(format!("{site_url}: missing host")))?
            .to_string();

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (kind, name) = match segments.as_slice() {
            ["sites", name, ..] => ("sites", *name),
            ["teams", name, ..] => ("teams", *name),
            [.., last] => ("sites", *last),
            [] => {
                return Err(GraphError::InvalidSite(format!(
                    "{site_url}: missing site path"
                )));
            }
        };

        Ok(Self {
            host,
            kind,
            name: name.to_string(),
        })
    }

    /// Graph path segment used with `GET /sites/{..}`.
    pub fn graph_path(&self) -> String {
        format!("{}:/{}/{}", self.host, self.kind, self.name)
    }
}

impl fmt::Display for SiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.kind, self.name)
    }
}
