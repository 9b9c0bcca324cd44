use crate::api::SearchApi;
use anyhow::{Context, Result};
use tagstream_core::PostView;

/// getPosts が 1 回で受け付ける URI の上限
pub const FETCH_BATCH_SIZE: usize = 25;

/// 履歴検索のページングエンジン
///
/// - `offset` は「これまでに返した投稿数」で進む。生ヒット数ではない
///   (一括解決で削除済み投稿が抜けるとヒット数と投稿数がずれるため)。
/// - 空ページは打ち切りの合図。エラーではなく空配列を返し、呼び出し側は
///   それ以上 `next()` を呼ばないこと。
/// - 失敗時は `offset` を動かさないので、同じ呼び出しをそのまま
///   リトライできる。
pub struct SearchEngine<A: SearchApi> {
    api: A,
    query: String,
    offset: usize,
}

impl<A: SearchApi> SearchEngine<A> {
    pub fn new(api: A, query: impl Into<String>) -> Self {
        Self {
            api,
            query: query.into(),
            offset: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 次の 1 ページを古い順で返す
    pub async fn next(&mut self) -> Result<Vec<PostView>> {
        let hits = self
            .api
            .search_page(&self.query, self.offset)
            .await
            .with_context(|| {
                format!(
                    "could not load posts for \"{}\" at offset {}",
                    self.query, self.offset
                )
            })?;

        // 空ページ = これ以上過去がない
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let uris: Vec<String> = hits.iter().map(|h| h.record_uri()).collect();

        // 25 件ずつ一括解決する。バッチをまたいでも相対順は保たれる。
        // 1 バッチでも失敗したらページ全体を失敗として返す (部分成功なし)。
        let mut posts: Vec<PostView> = Vec::with_capacity(uris.len());
        for chunk in uris.chunks(FETCH_BATCH_SIZE) {
            let batch = self.api.get_posts(chunk).await.with_context(|| {
                format!(
                    "could not load posts for \"{}\" at offset {}",
                    self.query, self.offset
                )
            })?;
            posts.extend(batch);
        }

        // エンドポイントは新しい順。返すのは古い順。
        posts.reverse();

        self.offset += posts.len();

        tracing::debug!(
            "[search] page resolved: {} hits -> {} posts (next offset {})",
            hits.len(),
            posts.len(),
            self.offset
        );

        Ok(posts)
    }
}
