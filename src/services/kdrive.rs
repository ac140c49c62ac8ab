use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// Thin WebDAV client for the kDrive file backend. All credentials and the
/// base URL come from configuration; nothing is compiled in.
pub struct KDriveClient {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
}

/// One entry of a PROPFIND listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KDriveEntry {
    pub name: String,
    pub href: String,
    pub is_collection: bool,
}

impl KDriveClient {
    pub fn from_state(state: &AppState) -> AppResult<Self> {
        let config = &state.config;
        let (Some(base), Some(username), Some(password)) = (
            config.kdrive_base_url.as_deref(),
            config.kdrive_username.clone(),
            config.kdrive_password.clone(),
        ) else {
            return Err(AppError::Dependency(
                "kDrive is not configured. Set KDRIVE_BASE_URL, KDRIVE_USERNAME and KDRIVE_PASSWORD."
                    .to_string(),
            ));
        };

        let base_url = Url::parse(base)
            .map_err(|_| AppError::Dependency("KDRIVE_BASE_URL is not a valid URL.".to_string()))?;

        Ok(Self {
            base_url,
            username,
            password,
            http: state.http_client.clone(),
        })
    }

    fn object_url(&self, segments: &[&str]) -> AppResult<Url> {
        build_object_url(&self.base_url, segments)
    }

    /// MKCOL; an existing folder (405) is not an error.
    pub async fn ensure_folder(&self, segments: &[&str]) -> AppResult<()> {
        let url = self.object_url(segments)?;
        let response = self
            .request(Method::from_bytes(b"MKCOL").expect("valid method"), url)
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::METHOD_NOT_ALLOWED | StatusCode::OK => Ok(()),
            status => Err(dependency_status_error("MKCOL", status)),
        }
    }

    pub async fn put_file(
        &self,
        segments: &[&str],
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<()> {
        let url = self.object_url(segments)?;
        let response = self
            .request(Method::PUT, url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(dependency_status_error("PUT", response.status()))
    }

    pub async fn get_file(&self, segments: &[&str]) -> AppResult<Vec<u8>> {
        let url = self.object_url(segments)?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound("File not found in kDrive.".to_string()));
        }
        if !response.status().is_success() {
            return Err(dependency_status_error("GET", response.status()));
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }

    /// DELETE; a missing object (404) is treated as already deleted.
    pub async fn delete(&self, segments: &[&str]) -> AppResult<()> {
        let url = self.object_url(segments)?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(dependency_status_error("DELETE", status)),
        }
    }

    /// PROPFIND with Depth 1. The folder itself is excluded from the result.
    pub async fn list_folder(&self, segments: &[&str]) -> AppResult<Vec<KDriveEntry>> {
        let url = self.object_url(segments)?;
        let own_path = url.path().trim_end_matches('/').to_string();

        let response = self
            .request(Method::from_bytes(b"PROPFIND").expect("valid method"), url)
            .header("Depth", "1")
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() && response.status().as_u16() != 207 {
            return Err(dependency_status_error("PROPFIND", response.status()));
        }

        let body = response.text().await.map_err(map_transport_error)?;
        Ok(parse_multistatus(&body)
            .into_iter()
            .filter(|entry| entry.href.trim_end_matches('/') != own_path)
            .collect())
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }
}

fn build_object_url(base_url: &Url, segments: &[&str]) -> AppResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| AppError::Dependency("KDRIVE_BASE_URL cannot be a base.".to_string()))?;
        path.pop_if_empty();
        for segment in segments {
            let trimmed = segment.trim().trim_matches('/');
            if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
                return Err(AppError::BadRequest(format!(
                    "Invalid kDrive path segment '{segment}'."
                )));
            }
            path.push(trimmed);
        }
    }
    Ok(url)
}

/// Minimal multistatus parse: pull each response's href and whether it is a
/// collection. WebDAV servers vary in namespace prefixes, so match on local
/// element names only.
fn parse_multistatus(body: &str) -> Vec<KDriveEntry> {
    let mut entries = Vec::new();
    let lowered = body.to_ascii_lowercase();

    let mut cursor = 0;
    while let Some(start) = find_element(&lowered, "response", cursor) {
        let Some(end) = find_element_end(&lowered, "response", start) else {
            break;
        };
        let block = &body[start..end];
        let block_lowered = &lowered[start..end];

        if let Some(href) = extract_element_text(block, block_lowered, "href") {
            let href = href.trim().to_string();
            let is_collection = block_lowered.contains("<collection")
                || block_lowered.contains(":collection");
            let name = href
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if !href.is_empty() {
                entries.push(KDriveEntry {
                    name: percent_decode(&name),
                    href,
                    is_collection,
                });
            }
        }
        cursor = end;
    }

    entries
}

fn find_element(lowered: &str, local_name: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while let Some(offset) = lowered[cursor..].find('<') {
        let position = cursor + offset;
        let rest = &lowered[position + 1..];
        if rest.starts_with(local_name) || tag_matches_with_prefix(rest, local_name) {
            return Some(position);
        }
        cursor = position + 1;
    }
    None
}

fn tag_matches_with_prefix(rest: &str, local_name: &str) -> bool {
    // Accept `<d:response`, `<D:response`, any prefix up to 16 chars.
    let Some(colon) = rest.find(':') else {
        return false;
    };
    if colon > 16 {
        return false;
    }
    rest[..colon]
        .chars()
        .all(|character| character.is_ascii_alphanumeric())
        && rest[colon + 1..].starts_with(local_name)
}

fn find_element_end(lowered: &str, local_name: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while let Some(offset) = lowered[cursor..].find("</") {
        let position = cursor + offset;
        let rest = &lowered[position + 2..];
        if rest.starts_with(local_name) || tag_matches_with_prefix(rest, local_name) {
            let close = lowered[position..].find('>')?;
            return Some(position + close + 1);
        }
        cursor = position + 2;
    }
    None
}

fn extract_element_text(block: &str, block_lowered: &str, local_name: &str) -> Option<String> {
    let start_tag = find_element(block_lowered, local_name, 0)?;
    let content_start = block_lowered[start_tag..].find('>')? + start_tag + 1;
    let end_tag = find_element_end(block_lowered, local_name, content_start)?;
    let close_start = block_lowered[content_start..end_tag].rfind("</")? + content_start;
    Some(block[content_start..close_start].to_string())
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let hex = &value[index + 1..index + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn map_transport_error(error: reqwest::Error) -> AppError {
    tracing::error!(error = %error, "kDrive request failed");
    if error.is_timeout() {
        return AppError::Dependency("kDrive request timed out.".to_string());
    }
    AppError::Dependency("kDrive request failed.".to_string())
}

fn dependency_status_error(operation: &str, status: StatusCode) -> AppError {
    tracing::error!(operation, status = %status, "kDrive returned non-success status");
    AppError::Dependency(format!("kDrive {operation} failed with status {status}."))
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{build_object_url, parse_multistatus, percent_decode};

    #[test]
    fn builds_encoded_object_urls() {
        let base = Url::parse("https://connect.drive.example.com/remote.php/dav/files/agency").unwrap();
        let url = build_object_url(&base, &["agency-1", "contrato renta 2026.pdf"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://connect.drive.example.com/remote.php/dav/files/agency/agency-1/contrato%20renta%202026.pdf"
        );

        assert!(build_object_url(&base, &[".."]).is_err());
        assert!(build_object_url(&base, &[""]).is_err());
    }

    #[test]
    fn parses_propfind_multistatus() {
        let body = r#"<?xml version="1.0"?>
            <d:multistatus xmlns:d="DAV:">
              <d:response>
                <d:href>/remote.php/dav/files/agency/docs/</d:href>
                <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
              </d:response>
              <d:response>
                <d:href>/remote.php/dav/files/agency/docs/lease%20a.pdf</d:href>
                <d:propstat><d:prop><d:resourcetype/></d:prop></d:propstat>
              </d:response>
            </d:multistatus>"#;

        let entries = parse_multistatus(body);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_collection);
        assert_eq!(entries[0].name, "docs");
        assert!(!entries[1].is_collection);
        assert_eq!(entries[1].name, "lease a.pdf");
        assert_eq!(
            entries[1].href,
            "/remote.php/dav/files/agency/docs/lease%20a.pdf"
        );
    }

    #[test]
    fn decodes_percent_sequences() {
        assert_eq!(percent_decode("lease%20a.pdf"), "lease a.pdf");
        assert_eq!(percent_decode("plain.txt"), "plain.txt");
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }
}
