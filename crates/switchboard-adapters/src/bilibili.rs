//! Bilibili video tools: search, video details, hot comments and rankings.
//!
//! All four share one [`BilibiliApi`] client. The public web API wraps every
//! payload in `{code, message, data}`; a non-zero `code` is an upstream error
//! even when the HTTP status is 200.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use switchboard_core::errors::AdapterError;
use switchboard_core::tools::{CallAdapter, InvocationContext, OutputKind, ToolDescriptor};
use switchboard_settings::HttpAdapterSettings;

use crate::http::{build_client, check_status, classify, endpoint};

const SEARCH_PATH: &str = "/x/web-interface/search/type";
const VIEW_PATH: &str = "/x/web-interface/view";
const TAGS_PATH: &str = "/x/tag/archive/tags";
const REPLY_PATH: &str = "/x/v2/reply";
const RANKING_PATH: &str = "/x/web-interface/ranking/v2";

const SEARCH_LIMIT: usize = 5;
const RANKING_LIMIT: usize = 20;
const DEFAULT_COMMENTS: u64 = 10;
const MAX_COMMENTS: u64 = 20;

/// Envelope codes Bilibili uses for throttling and anti-crawler blocks.
const THROTTLED_CODES: [i64; 3] = [-412, -509, -799];

const VIDEO_URL: &str = "https://www.bilibili.com/video/";

fn bvid_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "pattern": "^BV[0-9A-Za-z]{10}$",
        "description": "Video BV id, e.g. BV1xx411c7mD"
    })
}

/// Thin client over the Bilibili web API.
pub struct BilibiliApi {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BilibiliApi {
    pub fn new(settings: &HttpAdapterSettings) -> Self {
        let timeout = Duration::from_millis(settings.timeout_ms);
        Self {
            client: build_client(timeout),
            base_url: settings.base_url.clone(),
            timeout,
        }
    }

    /// GET `path` and unwrap the `data` member of the response envelope.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, AdapterError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, path))
            .header("Referer", "https://www.bilibili.com")
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;
        let mut body: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| classify(e, self.timeout))?;
        unwrap_envelope(path, &mut body)
    }
}

fn unwrap_envelope(path: &str, body: &mut serde_json::Value) -> Result<serde_json::Value, AdapterError> {
    let Some(code) = body["code"].as_i64() else {
        return Err(AdapterError::Rejected(format!(
            "{path}: response has no status code"
        )));
    };
    if code == 0 {
        return Ok(body["data"].take());
    }
    let message = body["message"].as_str().unwrap_or("unknown error").to_string();
    if THROTTLED_CODES.contains(&code) {
        return Err(AdapterError::Upstream {
            status: 429,
            body: format!("bilibili throttled ({code}): {message}"),
        });
    }
    Err(AdapterError::Rejected(format!("bilibili error {code}: {message}")))
}

fn text(v: &serde_json::Value, key: &str) -> String {
    v[key].as_str().unwrap_or_default().to_string()
}

fn count(v: &serde_json::Value) -> u64 {
    v.as_u64().unwrap_or_default()
}

fn video_url(bvid: &str) -> String {
    format!("{VIDEO_URL}{bvid}")
}

/// Search titles come back with the matched keyword wrapped in markup.
fn strip_highlight(title: &str) -> String {
    title
        .replace("<em class=\"keyword\">", "")
        .replace("</em>", "")
}

fn required_bvid(args: &serde_json::Value) -> Result<&str, AdapterError> {
    args["bvid"]
        .as_str()
        .ok_or_else(|| AdapterError::MalformedInput("bvid is required".into()))
}

/// Build all four Bilibili tools on one shared client.
pub fn bilibili_tools(settings: &HttpAdapterSettings) -> Vec<Arc<dyn CallAdapter>> {
    let api = Arc::new(BilibiliApi::new(settings));
    let search: Arc<dyn CallAdapter> = Arc::new(BilibiliSearchTool::new(Arc::clone(&api)));
    let info: Arc<dyn CallAdapter> = Arc::new(BilibiliVideoInfoTool::new(Arc::clone(&api)));
    let comments: Arc<dyn CallAdapter> = Arc::new(BilibiliCommentsTool::new(Arc::clone(&api)));
    let ranking: Arc<dyn CallAdapter> = Arc::new(BilibiliRankingTool::new(api));
    vec![search, info, comments, ranking]
}

// ── bilibili_search ─────────────────────────────────────────────────────────

pub struct BilibiliSearchTool {
    api: Arc<BilibiliApi>,
}

impl BilibiliSearchTool {
    pub fn new(api: Arc<BilibiliApi>) -> Self {
        Self { api }
    }
}

fn search_items(data: &serde_json::Value) -> Vec<serde_json::Value> {
    data["result"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter(|item| item["type"].as_str().map_or(true, |t| t == "video"))
                .take(SEARCH_LIMIT)
                .map(|item| {
                    let bvid = text(item, "bvid");
                    serde_json::json!({
                        "title": strip_highlight(item["title"].as_str().unwrap_or_default()),
                        "author": text(item, "author"),
                        "bvid": bvid,
                        "play": count(&item["play"]),
                        "duration": text(item, "duration"),
                        "description": text(item, "description"),
                        "url": video_url(&bvid),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl CallAdapter for BilibiliSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "bilibili_search",
            "Search Bilibili videos by keyword.",
            serde_json::json!({
                "type": "object",
                "required": ["keyword"],
                "additionalProperties": false,
                "properties": {
                    "keyword": {"type": "string", "minLength": 1, "description": "Search keyword"}
                }
            }),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let keyword = args["keyword"]
            .as_str()
            .ok_or_else(|| AdapterError::MalformedInput("keyword is required".into()))?;
        debug!(invocation_id = %ctx.invocation_id, keyword, "bilibili search");
        let data = self
            .api
            .get(
                SEARCH_PATH,
                &[
                    ("search_type", "video".to_string()),
                    ("keyword", keyword.to_string()),
                ],
            )
            .await?;
        let items = search_items(&data);
        Ok(serde_json::json!({
            "keyword": keyword,
            "count": items.len(),
            "items": items,
        }))
    }
}

// ── bilibili_video_info ─────────────────────────────────────────────────────

pub struct BilibiliVideoInfoTool {
    api: Arc<BilibiliApi>,
}

impl BilibiliVideoInfoTool {
    pub fn new(api: Arc<BilibiliApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CallAdapter for BilibiliVideoInfoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "bilibili_video_info",
            "Get title, author, statistics and tags of a Bilibili video.",
            serde_json::json!({
                "type": "object",
                "required": ["bvid"],
                "additionalProperties": false,
                "properties": {"bvid": bvid_schema()}
            }),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let bvid = required_bvid(&args)?;
        debug!(invocation_id = %ctx.invocation_id, bvid, "bilibili video info");
        let query = [("bvid", bvid.to_string())];
        let info = self.api.get(VIEW_PATH, &query).await?;

        // Tags are decorative; a failed lookup still returns the video.
        let tags: Vec<String> = match self.api.get(TAGS_PATH, &query).await {
            Ok(tags) => tags
                .as_array()
                .map(|list| list.iter().map(|t| text(t, "tag_name")).collect())
                .unwrap_or_default(),
            Err(err) => {
                warn!(invocation_id = %ctx.invocation_id, bvid, error = %err, "tag lookup failed");
                Vec::new()
            }
        };

        let stat = &info["stat"];
        Ok(serde_json::json!({
            "bvid": bvid,
            "title": text(&info, "title"),
            "desc": text(&info, "desc"),
            "author": text(&info["owner"], "name"),
            "mid": count(&info["owner"]["mid"]),
            "view_count": count(&stat["view"]),
            "like_count": count(&stat["like"]),
            "coin_count": count(&stat["coin"]),
            "favorite_count": count(&stat["favorite"]),
            "duration": count(&info["duration"]),
            "pubdate": count(&info["pubdate"]),
            "tags": tags,
            "url": video_url(bvid),
        }))
    }
}

// ── bilibili_video_comments ─────────────────────────────────────────────────

pub struct BilibiliCommentsTool {
    api: Arc<BilibiliApi>,
}

impl BilibiliCommentsTool {
    pub fn new(api: Arc<BilibiliApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CallAdapter for BilibiliCommentsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "bilibili_video_comments",
            "Get the hottest comments of a Bilibili video.",
            serde_json::json!({
                "type": "object",
                "required": ["bvid"],
                "additionalProperties": false,
                "properties": {
                    "bvid": bvid_schema(),
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_COMMENTS,
                        "description": "Number of comments (default 10)"
                    }
                }
            }),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let bvid = required_bvid(&args)?;
        let limit = args["limit"]
            .as_u64()
            .unwrap_or(DEFAULT_COMMENTS)
            .clamp(1, MAX_COMMENTS) as usize;
        debug!(invocation_id = %ctx.invocation_id, bvid, limit, "bilibili comments");

        // Replies are keyed by the numeric archive id, not the BV id.
        let info = self.api.get(VIEW_PATH, &[("bvid", bvid.to_string())]).await?;
        let aid = info["aid"]
            .as_u64()
            .ok_or_else(|| AdapterError::Rejected(format!("no archive id for {bvid}")))?;

        let replies = self
            .api
            .get(
                REPLY_PATH,
                &[
                    ("type", "1".to_string()),
                    ("oid", aid.to_string()),
                    ("sort", "1".to_string()),
                    ("pn", "1".to_string()),
                ],
            )
            .await?;
        let comments: Vec<serde_json::Value> = replies["replies"]
            .as_array()
            .map(|list| {
                list.iter()
                    .take(limit)
                    .map(|c| {
                        serde_json::json!({
                            "user": text(&c["member"], "uname"),
                            "content": text(&c["content"], "message"),
                            "like": count(&c["like"]),
                            "time": count(&c["ctime"]),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(serde_json::json!({
            "bvid": bvid,
            "comment_count": comments.len(),
            "comments": comments,
        }))
    }
}

// ── bilibili_ranking ────────────────────────────────────────────────────────

pub struct BilibiliRankingTool {
    api: Arc<BilibiliApi>,
}

impl BilibiliRankingTool {
    pub fn new(api: Arc<BilibiliApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CallAdapter for BilibiliRankingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "bilibili_ranking",
            "Get the Bilibili popularity ranking, site-wide or for one category.",
            serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "rid": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Category id, 0 for site-wide (default)"
                    },
                    "day": {
                        "type": "integer",
                        "enum": [1, 3, 7, 30],
                        "description": "Time window in days (default 7)"
                    }
                }
            }),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let rid = args["rid"].as_u64().unwrap_or(0);
        let day = args["day"].as_u64().unwrap_or(7);
        debug!(invocation_id = %ctx.invocation_id, rid, day, "bilibili ranking");
        let data = self
            .api
            .get(
                RANKING_PATH,
                &[
                    ("rid", rid.to_string()),
                    ("day", day.to_string()),
                    ("type", "all".to_string()),
                ],
            )
            .await?;

        let videos: Vec<serde_json::Value> = data["list"]
            .as_array()
            .map(|list| {
                list.iter()
                    .take(RANKING_LIMIT)
                    .map(|v| {
                        let bvid = text(v, "bvid");
                        serde_json::json!({
                            "title": text(v, "title"),
                            "author": text(&v["owner"], "name"),
                            "bvid": bvid,
                            "play": count(&v["stat"]["view"]),
                            "like": count(&v["stat"]["like"]),
                            "url": video_url(&bvid),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(serde_json::json!({
            "rid": rid,
            "day": day,
            "count": videos.len(),
            "videos": videos,
        }))
    }
}
