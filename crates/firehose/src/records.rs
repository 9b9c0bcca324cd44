//! ブロックアーカイブから取り出すレコードの閉じた型定義
//!
//! `$type` タグで振り分ける。未知のレコード種別は `Unknown` に落とし、
//! 呼び出し側が文字列タグを覗き直さなくて済むようにする。

use serde::Deserialize;
use tagstream_core::ReplyRefs;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum KnownRecord {
    #[serde(rename = "app.bsky.feed.post")]
    Post(PostRecord),
    #[serde(rename = "app.bsky.feed.like")]
    Like(LikeRecord),
    #[serde(rename = "app.bsky.feed.repost")]
    Repost(RepostRecord),
    #[serde(rename = "app.bsky.graph.follow")]
    Follow(FollowRecord),
    #[serde(other)]
    Unknown,
}

/// イベント内の軽量な投稿レコード。
/// カウントやラベルを持たないため、描画前に必ずビューを引き直すこと。
#[derive(Debug, Clone, Deserialize)]
pub struct PostRecord {
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(default)]
    pub reply: Option<ReplyRefs>,
    #[serde(default)]
    pub langs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LikeRecord {
    pub subject: tagstream_core::PostRef,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepostRecord {
    pub subject: tagstream_core::PostRef,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowRecord {
    /// フォロー先の DID
    pub subject: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

impl KnownRecord {
    pub fn as_post(&self) -> Option<&PostRecord> {
        match self {
            KnownRecord::Post(post) => Some(post),
            _ => None,
        }
    }
}
