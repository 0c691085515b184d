use beatmapbot_core::{CommentNode, CoreError, RedditApiError, Thing};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Refresh the token this long before Reddit expires it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListing<T> {
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingChild<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    pub permalink: String,
    #[serde(default)]
    pub body_html: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditSubmissionData {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    pub permalink: String,
    #[serde(default)]
    pub selftext_html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

/// Script-app Reddit API client. Authenticates lazily with the password
/// grant and re-authenticates when the token nears expiry, so an auth
/// outage surfaces as an ordinary request error instead of a crash.
#[derive(Debug)]
pub struct RedditClient {
    http_client: Client,
    credentials: RedditCredentials,
    user_agent: String,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, user_agent: String) -> Self {
        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            credentials,
            user_agent,
            token: Mutex::new(None),
        }
    }

    async fn ensure_token(&self) -> Result<String, CoreError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.token.clone());
            }
        }

        info!("Requesting Reddit access token for {}", self.credentials.username);
        let response = self
            .http_client
            .post(REDDIT_TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Token request failed with status {}", status);
            return Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!("token endpoint returned {status}"),
            }));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            error!("Failed to parse token response: {}", e);
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: "unparsable token response".to_string(),
            })
        })?;

        let token = AccessToken {
            token: token_response.access_token,
            expires_at: Instant::now() + Duration::from_secs(token_response.expires_in),
        };
        let access = token.token.clone();
        *guard = Some(token);
        debug!("Obtained access token, valid for {}s", token_response.expires_in);
        Ok(access)
    }

    async fn check_status(&self, endpoint: &str, response: Response) -> Result<Response, CoreError> {
        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return Ok(response);
        }
        error!("Request failed with status {} for {}", status, endpoint);

        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {} seconds", retry_after);
                Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                    retry_after,
                }))
            }
            401 => {
                // Token was revoked or expired early; force a re-auth next call.
                self.token.lock().await.take();
                Err(CoreError::RedditApi(RedditApiError::InvalidToken))
            }
            403 => Err(CoreError::RedditApi(RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            })),
            code if status.is_server_error() => {
                Err(CoreError::RedditApi(RedditApiError::ServerError {
                    status_code: code,
                }))
            }
            _ => Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("unexpected status {status} for {endpoint}"),
            })),
        }
    }

    async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Response, CoreError> {
        let access_token = self.ensure_token().await?;
        let url = format!("{REDDIT_API_BASE}{endpoint}");

        debug!("Making Reddit API request: GET {}", endpoint);
        let result = self
            .http_client
            .get(&url)
            .bearer_auth(&access_token)
            .query(query_params)
            .send()
            .await;

        match result {
            Ok(response) => self.check_status(endpoint, response).await,
            Err(e) => {
                error!("Network error for GET {}: {}", endpoint, e);
                if e.is_timeout() {
                    Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
                } else {
                    Err(CoreError::Network(e))
                }
            }
        }
    }

    /// Newest-first comments in a subreddit.
    pub async fn list_comments(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<Thing>, CoreError> {
        let endpoint = format!("/r/{subreddit}/comments");
        let limit_str = limit.to_string();
        let response = self.get(&endpoint, &[("limit", limit_str.as_str())]).await?;

        let listing: RedditListing<RedditCommentData> = response.json().await.map_err(|e| {
            error!("Failed to parse comments listing: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("comments listing for r/{subreddit}"),
            })
        })?;

        let things: Vec<Thing> = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into())
            .collect();
        info!("Retrieved {} comments from r/{}", things.len(), subreddit);
        Ok(things)
    }

    /// Newest-first submissions in a subreddit.
    pub async fn list_new(&self, subreddit: &str, limit: u32) -> Result<Vec<Thing>, CoreError> {
        let endpoint = format!("/r/{subreddit}/new");
        let limit_str = limit.to_string();
        let response = self.get(&endpoint, &[("limit", limit_str.as_str())]).await?;

        let listing: RedditListing<RedditSubmissionData> = response.json().await.map_err(|e| {
            error!("Failed to parse new listing: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("new listing for r/{subreddit}"),
            })
        })?;

        let things: Vec<Thing> = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into())
            .collect();
        info!("Retrieved {} submissions from r/{}", things.len(), subreddit);
        Ok(things)
    }

    /// The comment tree at a permalink. For a submission permalink this is
    /// the top-level comments; for a comment permalink the first node is
    /// the comment itself with its replies nested under it.
    pub async fn submission_comments(
        &self,
        permalink: &str,
    ) -> Result<Vec<CommentNode>, CoreError> {
        let endpoint = format!("{}.json", permalink.trim_end_matches('/'));
        let response = self.get(&endpoint, &[]).await?;

        let payload: Value = response.json().await.map_err(|e| {
            error!("Failed to parse comment tree: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("comment tree at {permalink}"),
            })
        })?;

        // The endpoint returns [submission listing, comment listing].
        let comment_listing = payload.get(1).ok_or_else(|| {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("missing comment listing at {permalink}"),
            })
        })?;
        Ok(parse_comment_tree(comment_listing))
    }

    /// Post a reply to a comment or submission.
    pub async fn post_reply(&self, thing: &Thing, text: &str) -> Result<(), CoreError> {
        let access_token = self.ensure_token().await?;
        let url = format!("{REDDIT_API_BASE}/api/comment");
        let fullname = thing.fullname();

        info!("Posting reply to {}", fullname);
        let result = self
            .http_client
            .post(&url)
            .bearer_auth(&access_token)
            .form(&[
                ("api_type", "json"),
                ("thing_id", fullname.as_str()),
                ("text", text),
            ])
            .send()
            .await;

        let response = match result {
            Ok(response) => self.check_status("/api/comment", response).await?,
            Err(e) => {
                error!("Network error posting reply to {}: {}", fullname, e);
                if e.is_timeout() {
                    return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let payload: Value = response.json().await.map_err(|e| {
            error!("Failed to parse reply response: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "reply response".to_string(),
            })
        })?;

        let errors = payload
            .pointer("/json/errors")
            .and_then(Value::as_array)
            .map(|a| a.as_slice())
            .unwrap_or_default();
        if !errors.is_empty() {
            return Err(CoreError::RedditApi(RedditApiError::PostFailed {
                thing_id: fullname,
                details: serde_json::to_string(errors).unwrap_or_default(),
            }));
        }

        info!("Replied to {}", fullname);
        Ok(())
    }
}

impl From<RedditCommentData> for Thing {
    fn from(data: RedditCommentData) -> Self {
        Thing::Comment {
            id: data.id,
            author: data.author.unwrap_or_else(|| "[deleted]".to_string()),
            permalink: data.permalink,
            body_html: data.body_html,
        }
    }
}

impl From<RedditSubmissionData> for Thing {
    fn from(data: RedditSubmissionData) -> Self {
        Thing::Submission {
            id: data.id,
            author: data.author.unwrap_or_else(|| "[deleted]".to_string()),
            permalink: data.permalink,
            selftext_html: data.selftext_html,
        }
    }
}

/// Walk a comment listing into [`CommentNode`]s. `replies` is either an
/// empty string or a nested listing, and children of kind other than
/// `t1` (e.g. `more` stubs) are skipped.
fn parse_comment_tree(listing: &Value) -> Vec<CommentNode> {
    let mut nodes = Vec::new();
    let children = listing
        .pointer("/data/children")
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default();

    for child in children {
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };
        let id = match data.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => continue,
        };
        let author = data
            .get("author")
            .and_then(Value::as_str)
            .unwrap_or("[deleted]")
            .to_string();
        let replies = match data.get("replies") {
            Some(replies) if replies.is_object() => parse_comment_tree(replies),
            _ => Vec::new(),
        };
        nodes.push(CommentNode {
            id,
            author,
            replies,
        });
    }
    nodes
}
