//! 各クレートで共有する投稿まわりの型定義
//!
//! 検索 API / getPosts / getProfile のレスポンスのうち、このコアが実際に
//! 解釈するフィールドだけを型にしている。embed や labels のような
//! 表示専用のデータは `serde_json::Value` のまま素通しする。

use serde::{Deserialize, Serialize};

/// 投稿への最小参照。リプライや引用に必要な情報はこれだけで足りる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

/// リプライ連結情報 (スレッドの起点 root と直前の親 parent)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRefs {
    pub root: PostRef,
    pub parent: PostRef,
}

// ---------------------------------------------------------------------------
// 検索 API のレスポンス
// ---------------------------------------------------------------------------

/// 履歴検索 1 ヒット分。`tid` は `<collection>/<rkey>` 形式。
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub tid: String,
    pub cid: String,
    pub user: SearchHitUser,
    pub post: SearchHitPost,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHitUser {
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHitPost {
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub text: String,
}

impl SearchHit {
    /// ヒットからレコード URI を組み立てる
    pub fn record_uri(&self) -> String {
        format!("at://{}/{}", self.user.did, self.tid)
    }
}

// ---------------------------------------------------------------------------
// 投稿ビュー (getPosts で取得する完全版)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    pub record: PostRecordView,
    /// 外部リンクカード・画像・引用など。描画層に素通しする
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<serde_json::Value>,
    /// 閲覧者のいいね/リポスト状態。ローカル操作後にのみ書き換わる
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<serde_json::Value>,
    #[serde(rename = "replyCount", skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<i64>,
    #[serde(rename = "repostCount", skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<i64>,
    #[serde(rename = "likeCount", skip_serializing_if = "Option::is_none")]
    pub like_count: Option<i64>,
    #[serde(rename = "indexedAt")]
    pub indexed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecordView {
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<serde_json::Value>,
}

impl PostView {
    pub fn post_ref(&self) -> PostRef {
        PostRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
        }
    }

    /// リプライ先 (parent) の作者 DID。スレッド文脈の表示に使う
    pub fn reply_parent_did(&self) -> Option<&str> {
        let reply = self.record.reply.as_ref()?;
        did_from_at_uri(&reply.parent.uri)
    }
}

// ---------------------------------------------------------------------------
// プロフィール
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileViewBasic {
    pub did: String,
    pub handle: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `at://did:plc:xxx/app.bsky.feed.post/yyy` から DID 部分を取り出す
pub fn did_from_at_uri(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("at://")?;
    let did = rest.split('/').next()?;
    if did.is_empty() {
        None
    } else {
        Some(did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uri() {
        let hit = SearchHit {
            tid: "app.bsky.feed.post/3jzfcijpj2z2a".to_string(),
            cid: "bafyreidfayvfuwqa2qskciqa".to_string(),
            user: SearchHitUser {
                did: "did:plc:abc123".to_string(),
                handle: "alice.bsky.social".to_string(),
            },
            post: SearchHitPost {
                created_at: "2024-01-01T00:00:00Z".to_string(),
                text: "hello".to_string(),
            },
        };
        assert_eq!(
            hit.record_uri(),
            "at://did:plc:abc123/app.bsky.feed.post/3jzfcijpj2z2a"
        );
    }

    #[test]
    fn test_did_from_at_uri() {
        assert_eq!(
            did_from_at_uri("at://did:plc:abc/app.bsky.feed.post/xyz"),
            Some("did:plc:abc")
        );
        assert_eq!(did_from_at_uri("at://did:plc:abc"), Some("did:plc:abc"));
        assert_eq!(did_from_at_uri("https://example.com"), None);
        assert_eq!(did_from_at_uri("at://"), None);
    }

    /// getPosts のレスポンス JSON から必要なフィールドが読めるか検証
    #[test]
    fn test_post_view_deserialize() {
        let json = r#"{
            "uri": "at://did:plc:abc/app.bsky.feed.post/3k1",
            "cid": "bafyreib2",
            "author": {
                "did": "did:plc:abc",
                "handle": "alice.bsky.social",
                "displayName": "Alice"
            },
            "record": {
                "$type": "app.bsky.feed.post",
                "text": "see #zib2!",
                "createdAt": "2024-05-01T12:00:00Z",
                "reply": {
                    "root": { "uri": "at://did:plc:root/app.bsky.feed.post/1", "cid": "bafyroot" },
                    "parent": { "uri": "at://did:plc:parent/app.bsky.feed.post/2", "cid": "bafyparent" }
                }
            },
            "replyCount": 1,
            "repostCount": 0,
            "likeCount": 5,
            "indexedAt": "2024-05-01T12:00:01Z"
        }"#;

        let view: PostView = serde_json::from_str(json).unwrap();
        assert_eq!(view.record.text, "see #zib2!");
        assert_eq!(view.like_count, Some(5));
        assert_eq!(view.reply_parent_did(), Some("did:plc:parent"));
        assert!(view.embed.is_none());
    }
}
