use super::error::TrackerError;
use super::response::{parse_http_response, AnnounceRequest, AnnounceResponse, TrackerEvent};
use crate::constants::{HTTP_TIMEOUT, USER_AGENT};
use reqwest::Client;
use std::net::IpAddr;

pub struct HttpAnnouncer {
    client: Client,
    url: String,
}

impl HttpAnnouncer {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Builds the GET URL. `event` is left out entirely for a regular
    /// announce since some trackers reject an empty value.
    pub fn announce_url(&self, request: &AnnounceRequest) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&numwant={}&key={:08x}",
            self.url,
            separator,
            url_encode(request.info_hash.as_bytes()),
            url_encode(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
            request.num_want,
            request.key,
        );

        if request.event != TrackerEvent::None {
            url.push_str("&event=");
            url.push_str(request.event.as_str());
        }

        if let Some(id) = &request.tracker_id {
            url.push_str("&trackerid=");
            url.push_str(&url_encode(id.as_bytes()));
        }

        url
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
        local_ip: Option<IpAddr>,
    ) -> Result<AnnounceResponse, TrackerError> {
        let response = self.client.get(self.announce_url(request)).send().await?;
        let body = response.bytes().await?;
        parse_http_response(&body, local_ip)
    }
}

fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
                format!("{}", b as char)
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}
