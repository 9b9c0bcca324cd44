use anyhow::{Context, Result};
use firehose::SubscriptionConfig;

/// 起動時に環境変数から読み込む設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 履歴検索エンドポイント
    pub search_url: String,
    /// getPosts / getProfile を受ける AppView のベース URL
    pub appview_url: String,
    /// 購読先リレーのベース URL (wss)
    pub relay_url: String,
    /// 追いかけるハッシュタグ (必須)
    pub hashtag: String,
    /// スレッド継続を永続化する SQLite の URL
    pub threading_db_url: String,
    /// 投稿に使うアカウントの DID。未設定なら継続チェックを省略する
    pub account_did: Option<String>,
    /// 起動時にさかのぼる検索ページ数
    pub backfill_pages: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let hashtag =
            std::env::var("HASHTAG").context("HASHTAG environment variable is not set")?;

        Ok(Self {
            search_url: std::env::var("SEARCH_URL")
                .unwrap_or_else(|_| "https://search.bsky.social/search/posts".to_string()),
            appview_url: std::env::var("APPVIEW_URL")
                .unwrap_or_else(|_| "https://api.bsky.app".to_string()),
            relay_url: std::env::var("RELAY_URL")
                .unwrap_or_else(|_| "wss://bsky.network".to_string()),
            hashtag,
            threading_db_url: std::env::var("THREADING_DB_URL")
                .unwrap_or_else(|_| "sqlite:data/threading.db".to_string()),
            account_did: std::env::var("ACCOUNT_DID").ok().filter(|s| !s.is_empty()),
            backfill_pages: std::env::var("BACKFILL_PAGES")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3),
        })
    }

    pub fn subscription(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            endpoint: self.relay_url.clone(),
            ..Default::default()
        }
    }
}
