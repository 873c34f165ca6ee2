//! Graph API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A drive item (file or folder).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
    #[serde(default)]
    pub file: Option<serde_json::Value>,
    #[serde(default)]
    pub parent_reference: Option<ParentReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default)]
    pub drive_id: Option<String>,
    /// e.g. `/drives/b!x/root:/Backups/2026`, or `/drives/b!x/root:` at the top.
    #[serde(default)]
    pub path: Option<String>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    /// Path of the item relative to the library root.
    pub fn library_path(&self) -> String {
        let parent = self
            .parent_reference
            .as_ref()
            .and_then(|p| p.path.as_deref())
            .and_then(|p| p.split_once(":/"))
            .map(|(_, rest)| rest.trim_matches('/'))
            .unwrap_or("");
        if parent.is_empty() {
            self.name.clone()
        } else {
            format!("{parent}/{}", self.name)
        }
    }
}

/// Body of `createUploadSession` and of session status/range responses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    /// Ranges still missing, e.g. `["26-"]` or `["0-12", "77-"]`.
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

impl UploadSessionResponse {
    /// First byte the server still needs.
    pub fn next_expected(&self) -> Option<u64> {
        self.next_expected_ranges
            .iter()
            .filter_map(|r| r.split('-').next()?.trim().parse::<u64>().ok())
            .min()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SiteResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Drive {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DrivesResponse {
    #[serde(default)]
    pub value: Vec<Drive>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewFolder<'a> {
    pub name: &'a str,
    pub folder: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionItem<'a> {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionRequest<'a> {
    pub item: SessionItem<'a>,
    pub defer_commit: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_expected_takes_lowest_start() {
        let resp = UploadSessionResponse {
            next_expected_ranges: vec!["77-".into(), "12-55".into()],
            ..Default::default()
        };
        assert_eq!(resp.next_expected(), Some(12));

        let resp = UploadSessionResponse::default();
        assert_eq!(resp.next_expected(), None);
    }

    #[test]
    fn session_response_parses() {
        let json = r#"{
            "uploadUrl": "https://contoso.sharepoint.com/_api/upload?guid=1",
            "expirationDateTime": "2026-10-20T08:00:00Z",
            "nextExpectedRanges": ["0-"]
        }"#;
        let resp: UploadSessionResponse = serde_json::from_str(json).unwrap();
        assert!(resp.upload_url.as_ref().unwrap().contains("guid=1"));
        assert!(resp.expiration_date_time.is_some());
        assert_eq!(resp.next_expected(), Some(0));
    }

    #[test]
    fn drive_item_parses_folder_facet() {
        let json = r#"{"id":"01ABC","name":"Reports","folder":{"childCount":3},"webUrl":"https://x/Reports"}"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert!(item.is_folder());
        assert_eq!(item.web_url.as_deref(), Some("https://x/Reports"));
    }

    #[test]
    fn library_path_from_parent_reference() {
        let json = r#"{"id":"1","name":"q3.xlsx","parentReference":{"path":"/drives/b!x/root:/Backups/2026"}}"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.library_path(), "Backups/2026/q3.xlsx");

        let json = r#"{"id":"2","name":"top.txt","parentReference":{"path":"/drives/b!x/root:"}}"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.library_path(), "top.txt");
    }

    #[test]
    fn create_session_body_shape() {
        let body = CreateSessionRequest {
            item: SessionItem {
                conflict_behavior: "rename",
            },
            defer_commit: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["item"]["@microsoft.graph.conflictBehavior"], "rename");
        assert_eq!(json["deferCommit"], false);
    }
}
