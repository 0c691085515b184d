mod bot;
mod compose;
mod extract;
mod seen;

use beatmapbot_core::AppConfig;
use bot::Bot;
use compose::Composer;
use osu_api::OsuClient;
use reddit_client::{RedditClient, RedditCredentials};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() {
    // Config problems are the only fatal ones and happen before any
    // stream is touched; they go to stdout, not the log.
    let config = match AppConfig::load(Path::new(CONFIG_PATH)) {
        Ok(config) => config,
        Err(e) => {
            println!("{e}");
            println!("Copy config_example.toml to config.toml and modify to your needs.");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter("beatmapbot=debug,reddit_client=info,osu_api=info")
        .init();

    tracing::info!("Starting beatmapbot for r/{}", config.reddit.subreddit);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let credentials = RedditCredentials {
        client_id: config.reddit.client_id.clone(),
        client_secret: config.reddit.client_secret.clone(),
        username: config.reddit.username.clone(),
        password: config.reddit.password.clone(),
    };
    let reddit = RedditClient::new(credentials, config.reddit.user_agent.clone());
    let osu = OsuClient::new(
        config.osu.api_key.clone(),
        &config.reddit.user_agent,
        config.bot.osu_cache,
    );
    let composer = Composer::new(osu, config.template.clone(), config.template_extras.clone());

    let mut bot = Bot::new(reddit, composer, &config);
    bot.run(&shutdown).await;
}
