use crate::compose::Composer;
use crate::extract;
use crate::seen::RecencySet;
use beatmapbot_core::{AppConfig, CommentNode, CoreError, MapRef, Thing};
use osu_api::BeatmapSource;
use reddit_client::RedditClient;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Headroom on top of the per-poll fetch limit, so a burst of activity
/// between polls cannot push still-relevant ids out of the seen cache.
const COMMENT_SEEN_MARGIN: usize = 100;
const SUBMISSION_SEEN_MARGIN: usize = 50;

/// Seam over the Reddit API, so the loop can be driven by a fake in tests.
pub trait Platform {
    fn list_comments(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Thing>, CoreError>>;

    fn list_new(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Thing>, CoreError>>;

    fn submission_comments(
        &self,
        permalink: &str,
    ) -> impl Future<Output = Result<Vec<CommentNode>, CoreError>>;

    fn post_reply(&self, thing: &Thing, text: &str)
        -> impl Future<Output = Result<(), CoreError>>;
}

impl Platform for RedditClient {
    async fn list_comments(&self, subreddit: &str, limit: u32) -> Result<Vec<Thing>, CoreError> {
        RedditClient::list_comments(self, subreddit, limit).await
    }

    async fn list_new(&self, subreddit: &str, limit: u32) -> Result<Vec<Thing>, CoreError> {
        RedditClient::list_new(self, subreddit, limit).await
    }

    async fn submission_comments(&self, permalink: &str) -> Result<Vec<CommentNode>, CoreError> {
        RedditClient::submission_comments(self, permalink).await
    }

    async fn post_reply(&self, thing: &Thing, text: &str) -> Result<(), CoreError> {
        RedditClient::post_reply(self, thing, text).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Comments,
    Submissions,
}

/// The bot's control loop: poll both streams newest-first, reply to new
/// things that link beatmaps, and treat every failure as transient.
pub struct Bot<P, S> {
    platform: P,
    composer: Composer<S>,
    subreddit: String,
    username: String,
    max_comments: u32,
    max_submissions: u32,
    poll_interval: Duration,
    backoff: Duration,
    seen_comments: RecencySet,
    seen_submissions: RecencySet,
}

impl<P: Platform, S: BeatmapSource> Bot<P, S> {
    pub fn new(platform: P, composer: Composer<S>, config: &AppConfig) -> Self {
        Self {
            platform,
            composer,
            subreddit: config.reddit.subreddit.clone(),
            username: config.reddit.username.clone(),
            max_comments: config.bot.max_comments,
            max_submissions: config.bot.max_submissions,
            poll_interval: Duration::from_secs(config.bot.poll_interval_secs),
            backoff: Duration::from_secs(config.bot.backoff_secs),
            seen_comments: RecencySet::new(config.bot.max_comments as usize + COMMENT_SEEN_MARGIN),
            seen_submissions: RecencySet::new(
                config.bot.max_submissions as usize + SUBMISSION_SEEN_MARGIN,
            ),
        }
    }

    /// Run until the shutdown flag is set. Ids already recorded as seen
    /// when an iteration fails stay recorded, so a partially handled
    /// thing is skipped rather than risked a second reply.
    pub async fn run(&mut self, shutdown: &AtomicBool) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Stopping the bot");
                return;
            }
            match self.poll_once().await {
                Ok(()) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!("Poll iteration failed: {}", e);
                    info!("Sleeping for {}s before retrying", self.backoff.as_secs());
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    async fn poll_once(&mut self) -> Result<(), CoreError> {
        let comments = self
            .platform
            .list_comments(&self.subreddit, self.max_comments)
            .await?;
        self.scan_stream(StreamKind::Comments, comments).await?;

        let submissions = self
            .platform
            .list_new(&self.subreddit, self.max_submissions)
            .await?;
        self.scan_stream(StreamKind::Submissions, submissions).await?;
        Ok(())
    }

    /// Walk one newest-first stream, stopping at the first thing we have
    /// already seen or already replied to.
    async fn scan_stream(
        &mut self,
        stream: StreamKind,
        things: Vec<Thing>,
    ) -> Result<(), CoreError> {
        for thing in things {
            if self.seen(stream).contains(thing.id()) {
                // Caught up to where the previous poll stopped.
                break;
            }
            // Recorded before anything fallible, so a failed reply is
            // never retried.
            self.seen_mut(stream).add(thing.id());

            let maps = extract::maps_from_thing(&thing);
            if maps.is_empty() {
                debug!("New {} {} with no maps", thing.kind_name(), thing.id());
                continue;
            }
            if self.has_replied(&thing).await? {
                info!(
                    "Already replied to {} {} in a past run",
                    thing.kind_name(),
                    thing.id()
                );
                // The stream is newest-first, so everything older was
                // handled by a previous instance as well.
                break;
            }
            self.reply(&thing, &maps).await?;
        }
        Ok(())
    }

    /// Re-read the live reply list to decide whether our account already
    /// answered this thing. Reddit has no direct query for this, and the
    /// seen cache is empty after a restart, so this is the real guard
    /// against double-posting.
    async fn has_replied(&self, thing: &Thing) -> Result<bool, CoreError> {
        let nodes = self.platform.submission_comments(thing.permalink()).await?;
        let replied = match thing {
            Thing::Comment { id, .. } => nodes
                .iter()
                .find(|node| node.id == *id)
                .map(|node| node.replies.iter().any(|reply| reply.author == self.username))
                .unwrap_or(false),
            Thing::Submission { .. } => nodes.iter().any(|node| node.author == self.username),
        };
        Ok(replied)
    }

    async fn reply(&self, thing: &Thing, maps: &[MapRef]) -> Result<(), CoreError> {
        if thing.author() == self.username {
            warn!(
                "Not replying to our own {} {}",
                thing.kind_name(),
                thing.id()
            );
            return Ok(());
        }
        let text = self.composer.compose(maps).await?;
        info!(
            "Replying to {}, {} id {}",
            thing.author(),
            thing.kind_name(),
            thing.id()
        );
        self.platform.post_reply(thing, &text).await
    }

    fn seen(&self, stream: StreamKind) -> &RecencySet {
        match stream {
            StreamKind::Comments => &self.seen_comments,
            StreamKind::Submissions => &self.seen_submissions,
        }
    }

    fn seen_mut(&mut self, stream: StreamKind) -> &mut RecencySet {
        match stream {
            StreamKind::Comments => &mut self.seen_comments,
            StreamKind::Submissions => &mut self.seen_submissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatmapbot_core::MapKind;
    use osu_api::BeatmapInfo;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    const BOT_NAME: &str = "beatmapbot";
    const MAP_HTML: &str =
        r#"<a href="https://osu.ppy.sh/b/244182">https://osu.ppy.sh/b/244182</a>"#;

    struct FakePlatform {
        comments: Vec<Thing>,
        submissions: Vec<Thing>,
        trees: HashMap<String, Vec<CommentNode>>,
        posted: Rc<RefCell<Vec<String>>>,
        tree_queries: Rc<RefCell<Vec<String>>>,
    }

    impl FakePlatform {
        fn new() -> Self {
            Self {
                comments: Vec::new(),
                submissions: Vec::new(),
                trees: HashMap::new(),
                posted: Rc::new(RefCell::new(Vec::new())),
                tree_queries: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl Platform for FakePlatform {
        async fn list_comments(
            &self,
            _subreddit: &str,
            _limit: u32,
        ) -> Result<Vec<Thing>, CoreError> {
            Ok(self.comments.clone())
        }

        async fn list_new(&self, _subreddit: &str, _limit: u32) -> Result<Vec<Thing>, CoreError> {
            Ok(self.submissions.clone())
        }

        async fn submission_comments(
            &self,
            permalink: &str,
        ) -> Result<Vec<CommentNode>, CoreError> {
            self.tree_queries.borrow_mut().push(permalink.to_string());
            Ok(self.trees.get(permalink).cloned().unwrap_or_default())
        }

        async fn post_reply(&self, thing: &Thing, _text: &str) -> Result<(), CoreError> {
            self.posted.borrow_mut().push(thing.fullname());
            Ok(())
        }
    }

    struct FakeSource;

    impl BeatmapSource for FakeSource {
        async fn lookup(&self, _kind: MapKind, _id: u64) -> Result<Vec<BeatmapInfo>, CoreError> {
            Ok(vec![BeatmapInfo {
                beatmap_id: "244182".to_string(),
                beatmapset_id: "93398".to_string(),
                artist: "xi".to_string(),
                title: "Freedom Dive".to_string(),
                creator: "Nakagawa-Kanon".to_string(),
                version: "FOUR DIMENSIONS".to_string(),
                source: "BMS".to_string(),
                approved: "1".to_string(),
                mode: "0".to_string(),
                bpm: "222.22".to_string(),
                difficultyrating: "7.0266755".to_string(),
                hit_length: "129".to_string(),
                total_length: "133".to_string(),
                max_combo: Some("1978".to_string()),
            }])
        }
    }

    fn test_config() -> AppConfig {
        toml::from_str(
            r#"
            [reddit]
            client_id = "id"
            client_secret = "secret"
            username = "beatmapbot"
            password = "pw"
            user_agent = "beatmapbot/1.0"
            subreddit = "osugame"

            [osu]
            api_key = "key"

            [template]
            header = "Beatmap info:"
            footer = "bot footer"
            map = "{artist} - {title} [{version}]"
            mapset = "{artist} - {title}"
        "#,
        )
        .unwrap()
    }

    fn comment(id: &str, author: &str, body_html: &str) -> Thing {
        Thing::Comment {
            id: id.to_string(),
            author: author.to_string(),
            permalink: format!("/r/osugame/comments/sub1/_/{id}/"),
            body_html: body_html.to_string(),
        }
    }

    fn bot(platform: FakePlatform) -> Bot<FakePlatform, FakeSource> {
        let config = test_config();
        let composer = Composer::new(
            FakeSource,
            config.template.clone(),
            config.template_extras.clone(),
        );
        Bot::new(platform, composer, &config)
    }

    #[tokio::test]
    async fn test_walk_stops_at_first_seen_id() {
        let mut platform = FakePlatform::new();
        platform.comments = vec![
            comment("a", "alice", "plain"),
            comment("b", "bob", "plain"),
            // Would trigger a reply if it were inspected.
            comment("c", "carol", MAP_HTML),
        ];
        let posted = platform.posted.clone();

        let mut bot = bot(platform);
        bot.seen_comments.add("c");
        bot.poll_once().await.unwrap();

        assert!(bot.seen_comments.contains("a"));
        assert!(bot.seen_comments.contains("b"));
        assert!(posted.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_plain_things_skip_the_replied_check() {
        let mut platform = FakePlatform::new();
        platform.comments = vec![comment("a", "alice", "<div>no links here</div>")];
        let queries = platform.tree_queries.clone();

        let mut bot = bot(platform);
        bot.poll_once().await.unwrap();

        assert!(bot.seen_comments.contains("a"));
        assert!(queries.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_new_map_comment_gets_a_reply() {
        let mut platform = FakePlatform::new();
        let thing = comment("a", "alice", MAP_HTML);
        platform
            .trees
            .insert(thing.permalink().to_string(), vec![CommentNode {
                id: "a".to_string(),
                author: "alice".to_string(),
                replies: Vec::new(),
            }]);
        platform.comments = vec![thing];
        let posted = platform.posted.clone();

        let mut bot = bot(platform);
        bot.poll_once().await.unwrap();

        assert_eq!(posted.borrow().as_slice(), ["t1_a"]);
        assert!(bot.seen_comments.contains("a"));
    }

    #[tokio::test]
    async fn test_already_replied_stops_the_walk() {
        let mut platform = FakePlatform::new();
        let newer = comment("a", "alice", MAP_HTML);
        // Older thing that would get a reply if the walk continued.
        let older = comment("b", "bob", MAP_HTML);
        platform.trees.insert(
            newer.permalink().to_string(),
            vec![CommentNode {
                id: "a".to_string(),
                author: "alice".to_string(),
                replies: vec![CommentNode {
                    id: "r1".to_string(),
                    author: BOT_NAME.to_string(),
                    replies: Vec::new(),
                }],
            }],
        );
        platform.trees.insert(
            older.permalink().to_string(),
            vec![CommentNode {
                id: "b".to_string(),
                author: "bob".to_string(),
                replies: Vec::new(),
            }],
        );
        platform.comments = vec![newer, older];
        let posted = platform.posted.clone();

        let mut bot = bot(platform);
        bot.poll_once().await.unwrap();

        assert!(posted.borrow().is_empty());
        assert!(bot.seen_comments.contains("a"));
        // The walk ended before the older thing was recorded.
        assert!(!bot.seen_comments.contains("b"));
    }

    #[tokio::test]
    async fn test_never_replies_to_itself() {
        let mut platform = FakePlatform::new();
        let own = comment("a", BOT_NAME, MAP_HTML);
        let other = comment("b", "bob", MAP_HTML);
        platform.trees.insert(
            own.permalink().to_string(),
            vec![CommentNode {
                id: "a".to_string(),
                author: BOT_NAME.to_string(),
                replies: Vec::new(),
            }],
        );
        platform.trees.insert(
            other.permalink().to_string(),
            vec![CommentNode {
                id: "b".to_string(),
                author: "bob".to_string(),
                replies: Vec::new(),
            }],
        );
        platform.comments = vec![own, other];
        let posted = platform.posted.clone();

        let mut bot = bot(platform);
        bot.poll_once().await.unwrap();

        // The self-authored thing is skipped, the walk continues.
        assert_eq!(posted.borrow().as_slice(), ["t1_b"]);
    }

    #[tokio::test]
    async fn test_submission_replied_check_uses_top_level_authors() {
        let mut platform = FakePlatform::new();
        let submission = Thing::Submission {
            id: "s1".to_string(),
            author: "alice".to_string(),
            permalink: "/r/osugame/comments/s1/title/".to_string(),
            selftext_html: Some(MAP_HTML.to_string()),
        };
        platform.trees.insert(
            submission.permalink().to_string(),
            vec![CommentNode {
                id: "x".to_string(),
                author: BOT_NAME.to_string(),
                replies: Vec::new(),
            }],
        );
        platform.submissions = vec![submission];
        let posted = platform.posted.clone();

        let mut bot = bot(platform);
        bot.poll_once().await.unwrap();

        assert!(posted.borrow().is_empty());
        assert!(bot.seen_submissions.contains("s1"));
    }

    #[tokio::test]
    async fn test_streams_have_separate_seen_sets() {
        let mut platform = FakePlatform::new();
        platform.comments = vec![comment("same", "alice", "plain")];
        platform.submissions = vec![Thing::Submission {
            id: "same".to_string(),
            author: "bob".to_string(),
            permalink: "/r/osugame/comments/same/title/".to_string(),
            selftext_html: None,
        }];

        let mut bot = bot(platform);
        bot.poll_once().await.unwrap();

        assert!(bot.seen_comments.contains("same"));
        assert!(bot.seen_submissions.contains("same"));
        assert_eq!(bot.seen_comments.len(), 1);
        assert_eq!(bot.seen_submissions.len(), 1);
    }
}
