//! セッション内のプロフィールキャッシュ
//!
//! 投稿者本人と、リプライ先の作者を表示するために使う。一度引いた
//! プロフィールはセッションが生きている間ずっと持ち続ける (失効も
//! 追い出しもしない)。登場する作者数で上限が決まるので問題にならない。

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use tagstream_core::{ProfileView, ProfileViewBasic};
use tokio::sync::RwLock;

/// プロフィール取得の口。テストでは mockall で差し替える。
#[async_trait]
pub trait ProfileApi {
    async fn get_profile(&self, did: &str) -> Result<ProfileView>;
}

pub struct HttpProfileApi {
    client: Client,
    appview_url: String,
}

impl HttpProfileApi {
    pub fn new(client: Client, appview_url: String) -> Self {
        Self {
            client,
            appview_url,
        }
    }
}

#[async_trait]
impl ProfileApi for HttpProfileApi {
    async fn get_profile(&self, did: &str) -> Result<ProfileView> {
        let url = format!("{}/xrpc/app.bsky.actor.getProfile", self.appview_url);
        let res = self
            .client
            .get(url)
            .query(&[("actor", did)])
            .send()
            .await
            .context("Failed to send getProfile request")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("getProfile API failed: {} - {}", status, text);
        }

        res.json().await.context("Failed to parse getProfile response")
    }
}

/// DID をキーにした書き捨てなしのキャッシュ
///
/// プロセス全体で共有するグローバルではなく、セッションごとに作って
/// パイプラインに渡す。
pub struct ProfileCache<A: ProfileApi> {
    api: A,
    entries: RwLock<HashMap<String, ProfileView>>,
}

impl<A: ProfileApi> ProfileCache<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// DID のプロフィールをキャッシュに載せる (冪等)
    ///
    /// 既に載っていれば何もしない。同じ DID への ensure が同時に走ると
    /// 二重取得になりうるが、同じ内容で上書きされるだけなので許容する。
    /// 取得失敗は warn を出して終わり。エントリは作られず、表示側が
    /// 「作者不明」のフォールバックを使う。
    pub async fn ensure(&self, did: &str) {
        if self.entries.read().await.contains_key(did) {
            return;
        }

        match self.api.get_profile(did).await {
            Ok(profile) => {
                self.entries.write().await.insert(did.to_string(), profile);
            }
            Err(e) => {
                tracing::warn!("[profiles] failed to fetch {}: {}", did, e);
            }
        }
    }

    pub async fn get(&self, did: &str) -> Option<ProfileView> {
        self.entries.read().await.get(did).cloned()
    }

    /// 投稿ビューに同梱されていた作者情報をそのまま取り込む
    /// (getProfile を 1 回分節約できる)
    pub async fn insert_basic(&self, author: &ProfileViewBasic) {
        let mut entries = self.entries.write().await;
        entries
            .entry(author.did.clone())
            .or_insert_with(|| ProfileView {
                did: author.did.clone(),
                handle: author.handle.clone(),
                display_name: author.display_name.clone(),
                avatar: author.avatar.clone(),
                description: None,
            });
    }
}
