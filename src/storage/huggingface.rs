use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{ self, BoxStream, StreamExt, TryStreamExt };
use log::debug;
use reqwest::header::{ HeaderMap, AUTHORIZATION, CONTENT_TYPE };
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::time::Duration;
use url::Url;
use super::{ ObjectStore, Revision, StoreError };

const ERROR_CODE_HEADER: &str = "x-error-code";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_oid: String,
}

#[derive(Deserialize)]
struct HubErrorBody {
    error: String,
}

/// Dataset repository on the Hugging Face Hub, accessed over its HTTP API.
pub struct HuggingFaceStore {
    client: reqwest::Client,
    endpoint: Url,
    repo_id: String,
    branch: String,
    token: String,
}

impl HuggingFaceStore {
    pub fn new(
        endpoint: &str,
        repo_id: &str,
        branch: &str,
        token: &str,
        timeout: Duration
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| format!("Invalid Hub endpoint '{}': {}", endpoint, e))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            repo_id: repo_id.to_string(),
            branch: branch.to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.endpoint
            .join(path)
            .map_err(|e| StoreError::Malformed(format!("cannot build URL for '{}': {}", path, e)))
    }

    fn commits_url(&self, page: usize) -> Result<Url, StoreError> {
        let mut url = self.url(&format!("api/datasets/{}/commits/{}", self.repo_id, self.branch))?;
        url.query_pairs_mut().append_pair("p", &page.to_string());
        Ok(url)
    }

    fn resolve_url(&self, revision: &str, path: &str) -> Result<Url, StoreError> {
        self.url(&format!("datasets/{}/resolve/{}/{}", self.repo_id, revision, path))
    }

    fn commit_url(&self) -> Result<Url, StoreError> {
        self.url(&format!("api/datasets/{}/commit/{}", self.repo_id, self.branch))
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn fetch_commit_page(&self, page: usize) -> Result<Vec<Revision>, StoreError> {
        let url = self.commits_url(page)?;
        debug!("Listing commits: {}", url);
        let resp = self.client.get(url).header(AUTHORIZATION, self.bearer()).send().await?;
        let resp = check(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| StoreError::Malformed(format!("commit listing: {}", e)))
    }
}

/// Passes successful responses through and turns the rest into a `StoreError`.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let error_code = error_code(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<HubErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);

    // A missing repo or branch is not an empty log.
    if matches!(error_code.as_deref(), Some("RepoNotFound") | Some("RevisionNotFound")) {
        return Err(StoreError::Http { status: status.as_u16(), message });
    }
    Err(StoreError::from_status(status.as_u16(), message))
}

fn error_code(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn commit_body(path: &str, content: &[u8], parent: Option<&str>, summary: &str) -> String {
    let mut header = json!({ "summary": summary, "description": "" });
    if let Some(parent) = parent {
        header["parentCommit"] = json!(parent);
    }
    let lines = [
        json!({ "key": "header", "value": header }),
        json!({
            "key": "file",
            "value": { "content": BASE64.encode(content), "path": path, "encoding": "base64" }
        }),
    ];
    lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ObjectStore for HuggingFaceStore {
    fn list_revisions(&self) -> BoxStream<'_, Result<Revision, StoreError>> {
        stream::try_unfold(Some(0usize), move |page| async move {
            let Some(page) = page else {
                return Ok::<_, StoreError>(None);
            };
            let revisions = self.fetch_commit_page(page).await?;
            let next = if revisions.is_empty() { None } else { Some(page + 1) };
            Ok(Some((stream::iter(revisions.into_iter().map(Ok::<_, StoreError>)), next)))
        })
        .try_flatten()
        .boxed()
    }

    async fn read_object(
        &self,
        path: &str,
        revision: Option<&str>
    ) -> Result<Vec<u8>, StoreError> {
        let url = self.resolve_url(revision.unwrap_or(&self.branch), path)?;
        debug!("Downloading {}", url);
        let resp = self.client.get(url).header(AUTHORIZATION, self.bearer()).send().await?;
        let resp = check(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn write_object(
        &self,
        path: &str,
        content: Vec<u8>,
        parent: Option<&str>,
        summary: &str
    ) -> Result<String, StoreError> {
        let url = self.commit_url()?;
        debug!("Committing {} bytes to {} (parent {:?})", content.len(), path, parent);
        let resp = self.client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(commit_body(path, &content, parent, summary))
            .send().await?;
        let resp = check(resp).await?;
        let body = resp.text().await?;
        let commit: CommitResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::Malformed(format!("commit response: {}", e)))?;
        Ok(commit.commit_oid)
    }

    fn describe(&self) -> String {
        format!("Hub dataset {}@{} ({})", self.repo_id, self.branch, self.endpoint)
    }
}
