//                                       ,--.   ,--.              ,--.
//  ,---.  ,---.  ,---. ,--.--. ,---.   ,-|  |   |  |-.  ,---. ,-'  '-.
// (  .-' | .--' | .-. ||  .--' | .-. :' .-. |   | .-. '| .-. |'-.  .-'
// .-'  `)\ `--. ' '-' '|  |    \   --.\ `-' |   | `-' |' '-' '  |  |
// `----'  `---'  `---' `--'     `----' `---'     `---'  `---'   `--'

// Requires a scored.co API session (key, secret, XSRF token).
// Comments on scored.co for you!
// I neither care nor am responsible for any damages.

// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

const API_BASE_URL: &str = "https://api.scored.co/api/v2";

#[derive(Parser, Debug)]
#[command(author, version, about = "Scored comment bot with a rotating pool of canned replies", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "comments.txt")]
    comments: PathBuf,

    #[arg(short, long, default_value = "processed_posts.json")]
    store: PathBuf,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone)]
struct Config {
    api_key: String,
    api_platform: String,
    api_secret: String,
    xsrf_token: String,
    user_agent: String,
    referer: String,
    communities: Vec<String>,
    poll_interval: Duration,
    comment_delay: Duration,
}

impl Config {
    fn from_env() -> Result<Self> {
        let communities = parse_communities(&required_env("COMMUNITY")?);
        if communities.is_empty() {
            bail!("COMMUNITY must list at least one community");
        }

        let poll_interval = optional_ms("POLL_INTERVAL_MS", 300_000)?;
        if poll_interval.is_zero() {
            bail!("POLL_INTERVAL_MS must be greater than zero");
        }

        Ok(Self {
            api_key: required_env("X_API_KEY")?,
            api_platform: required_env("X_API_PLATFORM")?,
            api_secret: required_env("X_API_SECRET")?,
            xsrf_token: required_env("X_XSRF_TOKEN")?,
            user_agent: required_env("USER_AGENT")?,
            referer: required_env("REFERER")?,
            communities,
            poll_interval,
            comment_delay: optional_ms("DELAY_BETWEEN_COMMENTS_MS", 3_000)?,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("Missing required environment variable: {}", name),
    }
}

fn optional_ms(name: &str, default_ms: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let ms: u64 = raw.trim().parse().with_context(|| {
                format!("{} must be a number of milliseconds, got {:?}", name, raw)
            })?;
            Ok(Duration::from_millis(ms))
        }
        _ => Ok(Duration::from_millis(default_ms)),
    }
}

fn parse_communities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_comments(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

// Shuffled-pool rotation: no comment repeats until every other comment has
// been used once within a shuffle cycle.
struct CommentPicker {
    full: Vec<String>,
    pool: Vec<String>,
    rng: StdRng,
}

impl CommentPicker {
    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let comments = parse_comments(&raw);
        if comments.is_empty() {
            bail!("{} is empty. Please add comments to it.", path.display());
        }
        Ok(Self::new(comments, StdRng::from_entropy()))
    }

    fn new(comments: Vec<String>, rng: StdRng) -> Self {
        Self {
            full: comments,
            pool: Vec::new(),
            rng,
        }
    }

    fn next(&mut self) -> String {
        if self.pool.is_empty() {
            self.pool = self.full.clone();
            self.pool.shuffle(&mut self.rng);
        }
        self.pool.pop().expect("comment list is never empty")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Post {
    #[serde(deserialize_with = "de_post_id")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    // Always overwritten with the community the post was fetched for.
    #[serde(default)]
    community: String,
}

// The API sends post ids as numbers in some payloads and strings in others.
fn de_post_id<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(u64),
        Str(String),
    }
    Ok(match RawId::deserialize(de)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

// The new-posts endpoint answers with either a bare array or { posts: [...] }.
#[derive(Deserialize)]
#[serde(untagged)]
enum NewPostsResponse {
    Bare(Vec<Post>),
    Wrapped {
        #[serde(default)]
        posts: Vec<Post>,
    },
}

impl NewPostsResponse {
    fn into_posts(self) -> Vec<Post> {
        match self {
            NewPostsResponse::Bare(posts) => posts,
            NewPostsResponse::Wrapped { posts } => posts,
        }
    }
}

// On-disk schema: a trimmed snapshot per handled post. Older store files that
// hold full post objects still load, since extra fields are ignored and
// missing ones default.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessedRecord {
    #[serde(deserialize_with = "de_post_id")]
    id: String,
    #[serde(default)]
    community: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    processed_at: Option<String>,
}

struct ProcessedStore {
    path: PathBuf,
    records: Vec<ProcessedRecord>,
    ids: HashSet<String>,
}

impl ProcessedStore {
    // A missing or corrupt store file resets to empty instead of aborting;
    // the worst case is re-commenting, never a crash.
    fn load(path: &Path) -> Self {
        let records = match fs::read_to_string(path) {
            Ok(raw) if !raw.trim().is_empty() => {
                match serde_json::from_str::<Vec<ProcessedRecord>>(&raw) {
                    Ok(records) => records,
                    Err(e) => {
                        println!(
                            "[WARNING] Could not parse {}: {}. Starting fresh.",
                            path.display(),
                            e
                        );
                        Vec::new()
                    }
                }
            }
            Ok(_) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                println!(
                    "[WARNING] Could not read {}: {}. Starting fresh.",
                    path.display(),
                    e
                );
                Vec::new()
            }
        };
        let ids = records.iter().map(|r| r.id.clone()).collect();
        Self {
            path: path.to_path_buf(),
            records,
            ids,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    // Rewrites the whole file after every append, so a crash mid-cycle never
    // loses more than the in-flight record.
    fn record(&mut self, post: &Post) -> Result<()> {
        let record = ProcessedRecord {
            id: post.id.clone(),
            community: post.community.clone(),
            title: post.title.clone(),
            processed_at: Some(
                chrono::Local::now()
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            ),
        };
        self.ids.insert(record.id.clone());
        self.records.push(record);

        let serialized = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Could not write {}", self.path.display()))
    }
}

fn unseen_oldest_first(posts: Vec<Post>, store: &ProcessedStore) -> Vec<Post> {
    let mut fresh: Vec<Post> = posts
        .into_iter()
        .filter(|post| !store.contains(&post.id))
        .collect();
    // The API returns newest-first; comment oldest-first.
    fresh.reverse();
    fresh
}

fn post_referer(base: &str, community: &str, post_id: &str) -> String {
    format!("{}/c/{}/{}", base.trim_end_matches('/'), community, post_id)
}

fn build_auth_headers(config: &Config) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-api-key", &config.api_key),
        ("x-api-platform", &config.api_platform),
        ("x-api-secret", &config.api_secret),
        ("x-xsrf-token", &config.xsrf_token),
    ] {
        headers.insert(
            name,
            HeaderValue::from_str(value)
                .with_context(|| format!("{} is not a valid header value", name))?,
        );
    }
    headers.insert(
        REFERER,
        HeaderValue::from_str(&config.referer).context("REFERER is not a valid header value")?,
    );
    Ok(headers)
}

struct CommentBot {
    http: reqwest::Client,
    auth_headers: HeaderMap,
    config: Config,
    picker: CommentPicker,
    store: ProcessedStore,
    verbose: bool,
}

impl CommentBot {
    fn new(
        config: Config,
        picker: CommentPicker,
        store: ProcessedStore,
        verbose: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        let auth_headers = build_auth_headers(&config)?;

        Ok(Self {
            http,
            auth_headers,
            config,
            picker,
            store,
            verbose,
        })
    }

    async fn fetch_new_posts(&self, community: &str) -> Result<Vec<Post>> {
        println!("[FETCH] Fetching new posts from community: {}...", community);

        let url = format!("{}/post/newv2.json", API_BASE_URL);
        let response = self
            .http
            .get(&url)
            .headers(self.auth_headers.clone())
            .query(&[("community", community)])
            .send()
            .await
            .with_context(|| format!("Request for new posts in {} failed", community))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Fetching posts for {} returned {}: {}",
                community,
                status,
                body.trim()
            );
        }

        let parsed: NewPostsResponse = response
            .json()
            .await
            .with_context(|| format!("Could not parse new posts response for {}", community))?;

        let mut posts = parsed.into_posts();
        for post in &mut posts {
            post.community = community.to_string();
        }
        Ok(posts)
    }

    // The provider signals success with a `status: true` body field; a 2xx
    // response without it is still a failure.
    async fn post_comment(&self, post: &Post, content: &str) -> Result<()> {
        let url = format!("{}/action/create_comment", API_BASE_URL);
        let referer = post_referer(&self.config.referer, &post.community, &post.id);
        let form = [
            ("content", content),
            ("parentId", post.id.as_str()),
            ("commentParentId", "0"),
            ("community", post.community.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .headers(self.auth_headers.clone())
            .header(REFERER, referer)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Request to comment on post {} failed", post.id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Commenting on post {} returned {}: {}",
                post.id,
                status,
                body.trim()
            );
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Could not parse comment response for post {}", post.id))?;

        if body.get("status").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            bail!("Provider rejected comment on post {}: {}", post.id, body)
        }
    }

    async fn run_cycle(&mut self) {
        println!("\n{}", "=".repeat(64));
        println!(
            "[CYCLE] Starting bot run at {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        println!("{}", "=".repeat(64));

        let communities = self.config.communities.clone();
        for community in communities {
            println!("\n--- Processing community: {} ---", community);

            let posts = match self.fetch_new_posts(&community).await {
                Ok(posts) => posts,
                Err(e) => {
                    println!("[ERROR] {:#}", e);
                    Vec::new()
                }
            };
            if self.verbose {
                println!("[FETCH] {} post(s) returned for {}", posts.len(), community);
            }

            if posts.is_empty() {
                println!("[INFO] No new posts found for {}.", community);
                continue;
            }

            let fresh = unseen_oldest_first(posts, &self.store);
            if fresh.is_empty() {
                println!(
                    "[INFO] All fetched posts for {} have already been processed.",
                    community
                );
                continue;
            }
            println!(
                "[INFO] Found {} new post(s) to process in {}.",
                fresh.len(),
                community
            );

            for post in fresh {
                let comment = self.picker.next();
                println!(
                    "[COMMENT] Posting to post {} in {}: \"{}\"",
                    post.id, post.community, comment
                );

                match self.post_comment(&post, &comment).await {
                    Ok(()) => println!("[SUCCESS] Commented on post {}!", post.id),
                    Err(e) => println!("[ERROR] {:#}", e),
                }

                // Recorded even when the attempt failed, so a failed comment
                // is never retried on a later cycle.
                match self.store.record(&post) {
                    Ok(()) => {
                        if self.verbose {
                            println!(
                                "[LOG] Saved post {} to {}",
                                post.id,
                                self.store.path.display()
                            );
                        }
                    }
                    Err(e) => println!(
                        "[ERROR] Could not persist processed post {}: {:#}",
                        post.id, e
                    ),
                }

                sleep(self.config.comment_delay).await;
            }
        }

        println!("\n[CYCLE] Bot run finished.");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    println!("{}", "=".repeat(64));
    println!("   Scored Comment Bot");
    println!("{}", "=".repeat(64));

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("[FATAL] {:#}", e);
        process::exit(1);
    });

    let picker = CommentPicker::load(&args.comments).unwrap_or_else(|e| {
        eprintln!("[FATAL] {:#}", e);
        process::exit(1);
    });
    println!(
        "[INIT] Loaded {} comments from {}.",
        picker.full.len(),
        args.comments.display()
    );

    let store = ProcessedStore::load(&args.store);
    println!("[INIT] Loaded {} previously processed post(s)", store.len());

    let mut bot = CommentBot::new(config, picker, store, args.verbose).unwrap_or_else(|e| {
        eprintln!("[FATAL] {:#}", e);
        process::exit(1);
    });

    println!(
        "[START] Watching communities \"{}\" every {} minute(s). Press Ctrl+C to quit.",
        bot.config.communities.join(", "),
        bot.config.poll_interval.as_secs_f64() / 60.0
    );

    let mut ticker = interval(bot.config.poll_interval);
    // Overrunning cycles delay the next tick instead of overlapping it.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately, so a cycle runs at startup.
        ticker.tick().await;
        bot.run_cycle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_picker(comments: &[&str], seed: u64) -> CommentPicker {
        CommentPicker::new(
            comments.iter().map(|c| c.to_string()).collect(),
            StdRng::seed_from_u64(seed),
        )
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            title: None,
            community: String::new(),
        }
    }

    fn temp_store_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", name, process::id()))
    }

    fn store_with(ids: &[&str]) -> ProcessedStore {
        ProcessedStore {
            path: PathBuf::new(),
            records: Vec::new(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[test]
    fn comment_parsing_trims_and_drops_blank_lines() {
        let parsed = parse_comments("hi\n\n  nice post  \n\t\nlol\n");
        assert_eq!(parsed, vec!["hi", "nice post", "lol"]);
    }

    #[test]
    fn picker_uses_every_comment_before_repeating() {
        let mut picker = seeded_picker(&["hi", "nice post", "lol"], 7);
        for _ in 0..4 {
            let round: HashSet<String> = (0..3).map(|_| picker.next()).collect();
            assert_eq!(round.len(), 3);
        }
    }

    #[test]
    fn picker_with_one_comment_always_returns_it() {
        let mut picker = seeded_picker(&["hi"], 0);
        for _ in 0..5 {
            assert_eq!(picker.next(), "hi");
        }
    }

    #[test]
    fn picker_is_deterministic_for_a_seed() {
        let mut a = seeded_picker(&["a", "b", "c", "d"], 42);
        let mut b = seeded_picker(&["a", "b", "c", "d"], 42);
        for _ in 0..12 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn filtering_skips_processed_posts_and_reverses_to_oldest_first() {
        let store = store_with(&["B"]);
        let fresh = unseen_oldest_first(vec![post("A"), post("B"), post("C")], &store);
        let ids: Vec<&str> = fresh.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A"]);
    }

    #[test]
    fn filtering_with_empty_store_keeps_everything_reversed() {
        let store = store_with(&[]);
        let fresh = unseen_oldest_first(vec![post("A"), post("B"), post("C")], &store);
        let ids: Vec<&str> = fresh.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "B", "A"]);
    }

    #[test]
    fn new_posts_response_accepts_bare_arrays() {
        let parsed: NewPostsResponse =
            serde_json::from_str(r#"[{"id": 1, "title": "first"}, {"id": "abc"}]"#).unwrap();
        let posts = parsed.into_posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "1");
        assert_eq!(posts[0].title.as_deref(), Some("first"));
        assert_eq!(posts[1].id, "abc");
    }

    #[test]
    fn new_posts_response_accepts_wrapped_objects() {
        let parsed: NewPostsResponse =
            serde_json::from_str(r#"{"status": true, "posts": [{"id": 42}]}"#).unwrap();
        let posts = parsed.into_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "42");
    }

    #[test]
    fn new_posts_response_without_posts_field_is_empty() {
        let parsed: NewPostsResponse =
            serde_json::from_str(r#"{"status": false, "error": "nope"}"#).unwrap();
        assert!(parsed.into_posts().is_empty());
    }

    #[test]
    fn community_list_is_split_and_trimmed() {
        assert_eq!(
            parse_communities(" funny , news,,tech "),
            vec!["funny", "news", "tech"]
        );
        assert!(parse_communities(" , ,").is_empty());
    }

    #[test]
    fn post_referer_strips_trailing_slash() {
        assert_eq!(
            post_referer("https://scored.co/", "funny", "123"),
            "https://scored.co/c/funny/123"
        );
        assert_eq!(
            post_referer("https://scored.co", "funny", "123"),
            "https://scored.co/c/funny/123"
        );
    }

    #[test]
    fn timing_vars_fall_back_to_defaults_when_unset() {
        assert_eq!(
            optional_ms("SCORED_BOT_TEST_UNSET_POLL_MS", 300_000).unwrap(),
            Duration::from_millis(300_000)
        );
        assert_eq!(
            optional_ms("SCORED_BOT_TEST_UNSET_DELAY_MS", 3_000).unwrap(),
            Duration::from_millis(3_000)
        );
    }

    #[test]
    fn store_survives_missing_and_corrupt_files() {
        let missing = ProcessedStore::load(Path::new("/nonexistent/processed_posts.json"));
        assert_eq!(missing.len(), 0);

        let path = temp_store_path("corrupt-store.json");
        fs::write(&path, "not json at all").unwrap();
        let corrupt = ProcessedStore::load(&path);
        assert_eq!(corrupt.len(), 0);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn store_records_are_persisted_and_reloaded() {
        let path = temp_store_path("roundtrip-store.json");
        fs::remove_file(&path).ok();

        let mut store = ProcessedStore::load(&path);
        let mut tagged = post("A");
        tagged.community = "funny".to_string();
        store.record(&tagged).unwrap();
        assert!(store.contains("A"));
        assert!(!store.contains("B"));

        let reloaded = ProcessedStore::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("A"));
        assert_eq!(reloaded.records[0].community, "funny");
        assert!(reloaded.records[0].processed_at.is_some());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn store_reads_legacy_full_post_snapshots() {
        let path = temp_store_path("legacy-store.json");
        fs::write(
            &path,
            r#"[{"id": 99, "title": "old", "author": "someone", "community": "news", "score": 5}]"#,
        )
        .unwrap();
        let store = ProcessedStore::load(&path);
        assert!(store.contains("99"));
        fs::remove_file(&path).ok();
    }
}
