use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use postsearch::{HttpSearchApi, SearchEngine};
use tagstream::pipeline::{wants_post_ops, LivePipeline, RenderSink};
use tagstream::profiles::{HttpProfileApi, ProfileCache};
use tagstream::state::AppConfig;
use tagstream_core::PostView;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 端末に流すだけの簡易シンク (本来の描画層の代役)
///
/// 印は「挿してから次の投稿が流れるまで」を表示中とみなす。
#[derive(Default)]
struct StdoutSink {
    marker_visible: AtomicBool,
}

impl RenderSink for StdoutSink {
    fn push_post(&self, post: PostView) {
        let name = post
            .author
            .display_name
            .clone()
            .unwrap_or_else(|| post.author.handle.clone());
        println!("[{}] {}: {}", post.record.created_at, name, post.record.text);
        self.marker_visible.store(false, Ordering::SeqCst);
    }

    fn push_gap_marker(&self) {
        println!("--- connection was lost, some posts may be missing ---");
        self.marker_visible.store(true, Ordering::SeqCst);
    }

    fn has_gap_marker(&self) -> bool {
        self.marker_visible.load(Ordering::SeqCst)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Starting Tagstream...");

    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Log initialized");

    let config = AppConfig::from_env()?;
    tracing::info!("Watching hashtag {}", config.hashtag);

    // Initialize Database
    tracing::info!("Connecting to database: {}", config.threading_db_url);
    let threading_db = tagstream::connect_database(&config.threading_db_url).await?;
    threading::migrate(&threading_db).await?;
    let continuations = threading::ContinuationStore::new(threading_db);

    // Initialize HTTP Client
    let http_client = reqwest::Client::builder()
        .user_agent("Tagstream/0.1")
        .build()
        .expect("Failed to build HTTP client");

    // 前回のスレッド継続が残っていれば知らせておく。続けるか破棄するかは
    // 投稿 UI がユーザーに確認してから決める
    if let Some(did) = &config.account_did {
        if let Some(c) = continuations.get(did, &config.hashtag).await? {
            tracing::info!(
                "Found stored thread continuation for {} (last post: {})",
                config.hashtag,
                c.parent.uri
            );
        }
    }

    let api = Arc::new(HttpSearchApi::new(
        http_client.clone(),
        config.search_url.clone(),
        config.appview_url.clone(),
    ));
    let profiles = Arc::new(ProfileCache::new(HttpProfileApi::new(
        http_client.clone(),
        config.appview_url.clone(),
    )));
    let sink = Arc::new(StdoutSink::default());
    let scope = Arc::new(RwLock::new(config.hashtag.clone()));

    // バックフィル: 各ページは古い順で返るが、ページ自体は新しい方から
    // さかのぼって取れる。表示は古い順なのでページ列を反転してから流す
    let mut engine = SearchEngine::new((*api).clone(), config.hashtag.clone());
    let mut pages = Vec::new();
    for _ in 0..config.backfill_pages {
        match engine.next().await {
            Ok(page) if page.is_empty() => break,
            Ok(page) => pages.push(page),
            Err(e) => {
                tracing::error!("[search] backfill stopped: {:#}", e);
                break;
            }
        }
    }
    for page in pages.into_iter().rev() {
        for post in page {
            profiles.insert_basic(&post.author).await;
            sink.push_post(post);
        }
    }

    // ライブ購読に切り替える
    let pipeline = LivePipeline::new(api, profiles, sink, scope);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down");
                shutdown.cancel();
            }
        });
    }

    let on_message = {
        let pipeline = pipeline.clone();
        move |event| {
            let pipeline = pipeline.clone();
            // イベントごとに独立して取得するため、完了順は到着順と
            // 一致しないことがある
            tokio::spawn(async move {
                pipeline.handle_commit(event).await;
            });
        }
    };
    let on_reopen = {
        let pipeline = pipeline.clone();
        move |attempt| pipeline.note_reconnect(attempt)
    };

    firehose::run_with_reconnect(
        &config.subscription(),
        shutdown,
        wants_post_ops,
        on_message,
        on_reopen,
    )
    .await?;

    Ok(())
}
