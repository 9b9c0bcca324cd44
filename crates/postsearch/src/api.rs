use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tagstream_core::{PostView, SearchHit};

/// 検索ページ取得と投稿一括解決の口。テストでは mockall で差し替える。
#[async_trait]
pub trait SearchApi {
    /// 指定オフセットからヒットを 1 ページ取得する (新しい順)
    async fn search_page(&self, q: &str, offset: usize) -> Result<Vec<SearchHit>>;

    /// URI の一括解決。1 回あたり最大 25 件。
    /// 削除済み投稿などは結果から抜け落ちるだけでエラーにはならない。
    async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>>;
}

#[derive(Deserialize)]
struct GetPostsResponse {
    posts: Vec<PostView>,
}

/// 本番実装。検索インデックスと AppView の 2 つのエンドポイントを叩く。
#[derive(Clone)]
pub struct HttpSearchApi {
    client: Client,
    search_url: String,
    appview_url: String,
}

impl HttpSearchApi {
    pub fn new(client: Client, search_url: String, appview_url: String) -> Self {
        Self {
            client,
            search_url,
            appview_url,
        }
    }
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn search_page(&self, q: &str, offset: usize) -> Result<Vec<SearchHit>> {
        let res = self
            .client
            .get(&self.search_url)
            .query(&[("q", q), ("offset", &offset.to_string())])
            .send()
            .await
            .context("Failed to send search request")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("Search API failed: {} - {}", status, text);
        }

        let hits: Vec<SearchHit> = res
            .json()
            .await
            .context("Failed to parse search response")?;
        Ok(hits)
    }

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>> {
        let url = format!("{}/xrpc/app.bsky.feed.getPosts", self.appview_url);
        let params: Vec<(&str, &str)> = uris.iter().map(|u| ("uris", u.as_str())).collect();

        let res = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .context("Failed to send getPosts request")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("getPosts API failed: {} - {}", status, text);
        }

        let body: GetPostsResponse = res
            .json()
            .await
            .context("Failed to parse getPosts response")?;
        Ok(body.posts)
    }
}
