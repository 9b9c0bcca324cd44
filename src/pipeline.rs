//! ライブ投稿パイプライン
//!
//! 購読から届いた commit イベントを操作単位にばらし、現在のハッシュタグ
//! スコープに合う投稿だけをビューに引き直して描画側へ渡す。
//!
//! イベントに載っているレコードはカウントもラベルも持たない軽量版
//! なので、そのまま描画せず毎回 getPosts でビューを取り直す。この
//! 引き直しはイベントごとに独立したタスクで走り、完了順が到着順と
//! 一致する保証はない。

use std::sync::Arc;

use firehose::{CommitEvent, CommitPayload, OpAction, RawRepoOp};
use postsearch::SearchApi;
use tagstream_core::PostView;
use tokio::sync::RwLock;

use crate::matcher::matches_hashtag;
use crate::profiles::{ProfileApi, ProfileCache};

/// デコード段階で投稿コレクション以外の操作を弾くフィルタ
///
/// ここで弾いておくと like / repost などのブロック取り出し自体が
/// 省略される。
pub fn wants_post_ops(_payload: &CommitPayload, op: &RawRepoOp) -> bool {
    op.path.starts_with("app.bsky.feed.post/")
}

/// 描画層への受け渡し口。リスト UI 側が実装する。
pub trait RenderSink: Send + Sync {
    /// 描画可能になった投稿を 1 件追加する
    fn push_post(&self, post: PostView);
    /// 「ここで投稿が欠けているかもしれない」という印をリストに挿す
    fn push_gap_marker(&self);
    /// 印がまだ表示されたまま残っているか
    fn has_gap_marker(&self) -> bool;
}

struct PipelineInner<A, P, S>
where
    P: ProfileApi,
{
    api: Arc<A>,
    profiles: Arc<ProfileCache<P>>,
    sink: Arc<S>,
    /// 現在のハッシュタグスコープ。接続を張り直さずに切り替えられる
    scope: Arc<RwLock<String>>,
}

pub struct LivePipeline<A, P, S>
where
    P: ProfileApi,
{
    inner: Arc<PipelineInner<A, P, S>>,
}

impl<A, P, S> Clone for LivePipeline<A, P, S>
where
    P: ProfileApi,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, P, S> LivePipeline<A, P, S>
where
    A: SearchApi + Send + Sync + 'static,
    P: ProfileApi + Send + Sync + 'static,
    S: RenderSink + 'static,
{
    pub fn new(
        api: Arc<A>,
        profiles: Arc<ProfileCache<P>>,
        sink: Arc<S>,
        scope: Arc<RwLock<String>>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                api,
                profiles,
                sink,
                scope,
            }),
        }
    }

    pub fn scope_handle(&self) -> Arc<RwLock<String>> {
        Arc::clone(&self.inner.scope)
    }

    pub async fn set_scope(&self, hashtag: impl Into<String>) {
        *self.inner.scope.write().await = hashtag.into();
    }

    /// 張り直しの直前に呼ぶ
    ///
    /// 初回接続では呼ばれない。印がまだ表示されたまま残っている間は
    /// 重ねて挿さない。
    pub fn note_reconnect(&self, attempt: u32) {
        if self.inner.sink.has_gap_marker() {
            return;
        }
        tracing::info!("[pipeline] reconnected (attempt {}), inserting gap marker", attempt);
        self.inner.sink.push_gap_marker();
    }

    /// 1 commit イベントを処理する
    ///
    /// 呼び出し側はイベントごとに spawn してよい。流量制限は設けて
    /// いないので、マッチが続くと取得が並行に積み上がる。
    pub async fn handle_commit(&self, event: CommitEvent) {
        let scope = self.inner.scope.read().await.clone();

        for op in &event.ops {
            if !matches!(op.action, OpAction::Create | OpAction::Update) {
                continue;
            }
            for payload in &op.payloads {
                let Some(post) = payload.as_post() else {
                    continue;
                };
                if !matches_hashtag(&post.text, &scope) {
                    continue;
                }
                self.resolve_and_render(op.record_uri(&event.repo)).await;
            }
        }
    }

    async fn resolve_and_render(&self, uri: String) {
        let posts = match self.inner.api.get_posts(&[uri.clone()]).await {
            Ok(posts) => posts,
            Err(e) => {
                tracing::warn!("[pipeline] could not load live post {}: {}", uri, e);
                return;
            }
        };
        let Some(post) = posts.into_iter().next() else {
            // 取得前に消された投稿。黙って流す
            tracing::debug!("[pipeline] post vanished before fetch: {}", uri);
            return;
        };

        // 取得の間にスコープが切り替わっていることがある。解決時点の
        // スコープで照合し直し、外れていたら描画せずに捨てる
        let current = self.inner.scope.read().await.clone();
        if !matches_hashtag(&post.record.text, &current) {
            tracing::debug!("[pipeline] dropping stale fetch for {}: scope moved", uri);
            return;
        }

        self.inner.profiles.insert_basic(&post.author).await;
        if let Some(did) = post.reply_parent_did() {
            let did = did.to_string();
            self.inner.profiles.ensure(&did).await;
        }

        self.inner.sink.push_post(post);
    }
}
