//! スレッド継続の記録
//!
//! (アカウント, ハッシュタグ) ごとに「このスコープで最後に送った投稿」を
//! root / parent の組で覚えておき、次の投稿を同じスレッドにぶら下げる
//! ために使う。ここだけはセッションをまたいで残したい状態なので
//! SQLite に永続化する。
//!
//! テーブル: `thread_continuations`
//!   - account / hashtag : 複合主キー
//!   - root_uri, root_cid      : スレッド起点 (初回書き込みで固定)
//!   - parent_uri, parent_cid  : 直近に送った投稿 (送るたびに前進)
//!   - updated_at              : UNIX タイムスタンプ秒

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tagstream_core::{PostRef, PostView, ReplyRefs};

/// スコープに紐づく継続状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContinuation {
    pub root: PostRef,
    pub parent: PostRef,
}

/// 必要なテーブルを作成する (冪等)
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thread_continuations (
            account    TEXT NOT NULL,
            hashtag    TEXT NOT NULL,
            root_uri   TEXT NOT NULL,
            root_cid   TEXT NOT NULL,
            parent_uri TEXT NOT NULL,
            parent_cid TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (account, hashtag)
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub struct ContinuationStore {
    pool: SqlitePool,
}

impl ContinuationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// スコープの継続状態を取得する
    pub async fn get(&self, account: &str, hashtag: &str) -> Result<Option<ThreadContinuation>> {
        let row = sqlx::query(
            "SELECT root_uri, root_cid, parent_uri, parent_cid
             FROM thread_continuations WHERE account = ? AND hashtag = ?",
        )
        .bind(account)
        .bind(hashtag)
        .fetch_optional(&self.pool)
        .await
        .context("threading: get query failed")?;

        Ok(row.map(|r| ThreadContinuation {
            root: PostRef {
                uri: r.get("root_uri"),
                cid: r.get("root_cid"),
            },
            parent: PostRef {
                uri: r.get("parent_uri"),
                cid: r.get("parent_cid"),
            },
        }))
    }

    /// 送信に成功した投稿を記録する
    ///
    /// - 他人の投稿への明示的なリプライ (`is_reply_to_other`) はスコープの
    ///   継続と無関係なので何も書かない。
    /// - 初回: この投稿自身が root かつ parent になる。
    /// - 2 回目以降: root は据え置き、parent だけが新しい投稿に前進する。
    ///   parent が過去の投稿に戻ることはない。
    pub async fn record_post(
        &self,
        account: &str,
        hashtag: &str,
        post_ref: &PostRef,
        is_reply_to_other: bool,
    ) -> Result<()> {
        if is_reply_to_other {
            return Ok(());
        }

        let root = match self.get(account, hashtag).await? {
            Some(existing) => existing.root,
            None => post_ref.clone(),
        };

        let updated_at = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT OR REPLACE INTO thread_continuations
             (account, hashtag, root_uri, root_cid, parent_uri, parent_cid, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(account)
        .bind(hashtag)
        .bind(&root.uri)
        .bind(&root.cid)
        .bind(&post_ref.uri)
        .bind(&post_ref.cid)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .context("threading: record_post upsert failed")?;

        tracing::debug!(
            "[threading] {}/{} parent -> {}",
            account,
            hashtag,
            post_ref.uri
        );

        Ok(())
    }

    /// スコープの継続を破棄する (「続きから書かない」選択に対応する)
    pub async fn clear(&self, account: &str, hashtag: &str) -> Result<()> {
        sqlx::query("DELETE FROM thread_continuations WHERE account = ? AND hashtag = ?")
            .bind(account)
            .bind(hashtag)
            .execute(&self.pool)
            .await
            .context("threading: clear query failed")?;

        Ok(())
    }
}

/// 次の投稿に付けるリプライ連結を決める
///
/// - 他人の投稿 `explicit_target` への明示リプライなら、その投稿の root
///   (なければその投稿自身) を root に、その投稿自身を parent にする。
///   スコープの継続状態は参照もしない。
/// - そうでなければ保存済みの継続をそのまま使う。継続が無ければ None
///   (スレッド先頭の投稿なので連結なし)。
pub fn reply_refs_for(
    continuation: Option<&ThreadContinuation>,
    explicit_target: Option<&PostView>,
) -> Option<ReplyRefs> {
    if let Some(target) = explicit_target {
        let target_ref = target.post_ref();
        let root = match &target.record.reply {
            Some(reply) => reply.root.clone(),
            None => target_ref.clone(),
        };
        return Some(ReplyRefs {
            root,
            parent: target_ref,
        });
    }

    continuation.map(|c| ReplyRefs {
        root: c.root.clone(),
        parent: c.parent.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagstream_core::{PostRecordView, ProfileViewBasic};

    async fn in_memory_store() -> ContinuationStore {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        ContinuationStore::new(pool)
    }

    fn post_ref(n: usize) -> PostRef {
        PostRef {
            uri: format!("at://did:plc:me/app.bsky.feed.post/{}", n),
            cid: format!("cid{}", n),
        }
    }

    fn view(uri: &str, reply: Option<ReplyRefs>) -> PostView {
        PostView {
            uri: uri.to_string(),
            cid: "cid-view".to_string(),
            author: ProfileViewBasic {
                did: "did:plc:other".to_string(),
                handle: "other.bsky.social".to_string(),
                display_name: None,
                avatar: None,
            },
            record: PostRecordView {
                text: String::new(),
                created_at: String::new(),
                reply,
                facets: None,
            },
            embed: None,
            labels: None,
            viewer: None,
            reply_count: None,
            repost_count: None,
            like_count: None,
            indexed_at: String::new(),
        }
    }

    // 観点1: 初回投稿で root = parent = 自分自身になる
    #[tokio::test]
    async fn test_first_post_sets_root_and_parent() {
        let store = in_memory_store().await;
        let r1 = post_ref(1);

        store
            .record_post("did:plc:me", "#zib2", &r1, false)
            .await
            .unwrap();

        let c = store.get("did:plc:me", "#zib2").await.unwrap().unwrap();
        assert_eq!(c.root, r1);
        assert_eq!(c.parent, r1);
    }

    // 観点2: 2 回目以降は parent だけ前進し root は固定
    #[tokio::test]
    async fn test_parent_advances_root_preserved() {
        let store = in_memory_store().await;
        let r1 = post_ref(1);
        let r2 = post_ref(2);
        let r3 = post_ref(3);

        store
            .record_post("did:plc:me", "#zib2", &r1, false)
            .await
            .unwrap();
        store
            .record_post("did:plc:me", "#zib2", &r2, false)
            .await
            .unwrap();
        store
            .record_post("did:plc:me", "#zib2", &r3, false)
            .await
            .unwrap();

        let c = store.get("did:plc:me", "#zib2").await.unwrap().unwrap();
        assert_eq!(c.root, r1, "root は最初の投稿のまま");
        assert_eq!(c.parent, r3, "parent は最後に送った投稿まで前進する");
    }

    // 観点3: 他人の投稿への明示リプライは保存状態に触れない
    #[tokio::test]
    async fn test_explicit_reply_bypasses_store() {
        let store = in_memory_store().await;
        let r1 = post_ref(1);
        let r2 = post_ref(2);

        store
            .record_post("did:plc:me", "#zib2", &r1, false)
            .await
            .unwrap();
        store
            .record_post("did:plc:me", "#zib2", &r2, true)
            .await
            .unwrap();

        let c = store.get("did:plc:me", "#zib2").await.unwrap().unwrap();
        assert_eq!(c.parent, r1, "明示リプライでは parent が動かないこと");

        // 継続がまだ無いスコープでも、明示リプライは何も作らない
        store
            .record_post("did:plc:me", "#other", &r2, true)
            .await
            .unwrap();
        assert!(store.get("did:plc:me", "#other").await.unwrap().is_none());
    }

    // 観点4: clear で破棄すると次の投稿が新しいスレッドを始める
    #[tokio::test]
    async fn test_clear_then_fresh_thread() {
        let store = in_memory_store().await;
        let r1 = post_ref(1);
        let r2 = post_ref(2);

        store
            .record_post("did:plc:me", "#zib2", &r1, false)
            .await
            .unwrap();
        store.clear("did:plc:me", "#zib2").await.unwrap();
        assert!(store.get("did:plc:me", "#zib2").await.unwrap().is_none());

        store
            .record_post("did:plc:me", "#zib2", &r2, false)
            .await
            .unwrap();
        let c = store.get("did:plc:me", "#zib2").await.unwrap().unwrap();
        assert_eq!(c.root, r2, "破棄後の投稿が新しい root になる");
    }

    // 観点5: アカウントとハッシュタグの組ごとに独立している
    #[tokio::test]
    async fn test_scopes_are_independent() {
        let store = in_memory_store().await;
        let r1 = post_ref(1);
        let r2 = post_ref(2);

        store
            .record_post("did:plc:me", "#zib2", &r1, false)
            .await
            .unwrap();
        store
            .record_post("did:plc:me", "#rust", &r2, false)
            .await
            .unwrap();

        let a = store.get("did:plc:me", "#zib2").await.unwrap().unwrap();
        let b = store.get("did:plc:me", "#rust").await.unwrap().unwrap();
        assert_eq!(a.parent, r1);
        assert_eq!(b.parent, r2);
        assert!(store.get("did:plc:you", "#zib2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        let result = migrate(&pool).await;
        assert!(result.is_ok());
    }

    // -- reply_refs_for ------------------------------------------------------

    #[test]
    fn test_reply_refs_fresh_thread() {
        assert!(reply_refs_for(None, None).is_none());
    }

    #[test]
    fn test_reply_refs_from_continuation() {
        let c = ThreadContinuation {
            root: post_ref(1),
            parent: post_ref(3),
        };
        let refs = reply_refs_for(Some(&c), None).unwrap();
        assert_eq!(refs.root, post_ref(1));
        assert_eq!(refs.parent, post_ref(3));
    }

    #[test]
    fn test_reply_refs_explicit_target_with_own_root() {
        let c = ThreadContinuation {
            root: post_ref(1),
            parent: post_ref(3),
        };
        let target_root = PostRef {
            uri: "at://did:plc:other/app.bsky.feed.post/root".to_string(),
            cid: "cid-root".to_string(),
        };
        let target = view(
            "at://did:plc:other/app.bsky.feed.post/mid",
            Some(ReplyRefs {
                root: target_root.clone(),
                parent: target_root.clone(),
            }),
        );

        // 継続があっても明示ターゲットが優先され、継続は参照されない
        let refs = reply_refs_for(Some(&c), Some(&target)).unwrap();
        assert_eq!(refs.root, target_root, "相手のスレッドの root を引き継ぐ");
        assert_eq!(refs.parent.uri, "at://did:plc:other/app.bsky.feed.post/mid");
    }

    #[test]
    fn test_reply_refs_explicit_target_without_root() {
        let target = view("at://did:plc:other/app.bsky.feed.post/solo", None);
        let refs = reply_refs_for(None, Some(&target)).unwrap();
        assert_eq!(refs.root.uri, "at://did:plc:other/app.bsky.feed.post/solo");
        assert_eq!(refs.parent.uri, "at://did:plc:other/app.bsky.feed.post/solo");
    }
}
