//! フレームのデコード
//!
//! 1 フレーム = ヘッダ (`{op, t}`) とペイロードの 2 つの DAG-CBOR 値。
//! - `op != 1` はストリーム致命エラー。ヘッダに続くエラー情報を添えて
//!   呼び出し側に返し、接続ごと作り直してもらう。
//! - `#commit` 以外のメッセージ (handle 変更などの管理系) は `None` で
//!   黙って捨てる。
//! - 操作単位のデコード失敗 (壊れたブロック等) はその操作のペイロードを
//!   空にするだけで、フレーム全体は生かす。

use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{Context, Result};
use cid::Cid;
use iroh_car::CarReader;
use serde::Deserialize;

use crate::records::KnownRecord;

/// 購読している名前空間。`t` と連結してイベント種別名になる。
pub const EVENT_NAMESPACE: &str = "com.atproto.sync.subscribeRepos";

#[derive(Debug, Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorFrame {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// `#commit` ペイロードのワイヤ表現
#[derive(Debug, Deserialize)]
pub struct CommitPayload {
    pub seq: i64,
    pub repo: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub commit: Option<Cid>,
    #[serde(default)]
    pub rebase: bool,
    #[serde(rename = "tooBig", default)]
    pub too_big: bool,
    /// CAR 形式のブロックアーカイブ
    #[serde(with = "serde_bytes", default)]
    pub blocks: Vec<u8>,
    pub ops: Vec<RawRepoOp>,
    pub time: String,
}

/// ペイロード抽出前の生の操作
#[derive(Debug, Clone, Deserialize)]
pub struct RawRepoOp {
    pub action: String,
    pub path: String,
    #[serde(default)]
    pub cid: Option<Cid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

impl OpAction {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// デコード済みの commit イベント
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub seq: i64,
    pub repo: String,
    pub time: String,
    pub ops: Vec<RepoOp>,
}

#[derive(Debug, Clone)]
pub struct RepoOp {
    pub action: OpAction,
    pub path: String,
    pub cid: Option<Cid>,
    /// ブロックアーカイブから取り出したレコード。delete では常に空。
    pub payloads: Vec<KnownRecord>,
}

impl RepoOp {
    /// この操作が指すレコードの URI
    pub fn record_uri(&self, repo: &str) -> String {
        format!("at://{}/{}", repo, self.path)
    }
}

/// 1 フレームをデコードする
///
/// - `Ok(Some(event))` : commit イベント
/// - `Ok(None)`        : 表に出す価値のない管理系メッセージ
/// - `Err(_)`          : ストリーム致命エラー (エラーフレーム or 解釈不能なヘッダ)
///
/// `op_filter` は各操作についてペイロード抽出の前に評価され、false を
/// 返した操作はブロック参照ごとスキップされる。
pub async fn decode_frame<F>(data: &[u8], mut op_filter: F) -> Result<Option<CommitEvent>>
where
    F: FnMut(&CommitPayload, &RawRepoOp) -> bool,
{
    let mut cursor = Cursor::new(data);

    let header: FrameHeader =
        serde_ipld_dagcbor::from_reader(&mut cursor).context("Failed to decode frame header")?;

    if header.op != 1 {
        // エラーフレーム。ペイロードの error / message を添えて返す
        let detail: ErrorFrame = serde_ipld_dagcbor::from_reader(&mut cursor).unwrap_or(ErrorFrame {
            error: "UnknownError".to_string(),
            message: None,
        });
        anyhow::bail!(
            "stream error frame: {} - {}",
            detail.error,
            detail.message.unwrap_or_default()
        );
    }

    let t = header.t.context("message frame without type tag")?;
    if t != "#commit" {
        tracing::trace!("[firehose] dropping {}{}", EVENT_NAMESPACE, t);
        return Ok(None);
    }

    let payload: CommitPayload =
        serde_ipld_dagcbor::from_reader(&mut cursor).context("Failed to decode commit payload")?;

    let blocks = read_block_map(&payload.blocks).await;

    let mut ops = Vec::with_capacity(payload.ops.len());
    for raw in &payload.ops {
        if !op_filter(&payload, raw) {
            continue;
        }

        let Some(action) = OpAction::from_str(&raw.action) else {
            tracing::trace!("[firehose] unknown op action: {}", raw.action);
            continue;
        };

        let mut payloads = Vec::new();
        if matches!(action, OpAction::Create | OpAction::Update) {
            if let Some(cid) = raw.cid.as_ref() {
                match blocks.get(cid) {
                    Some(bytes) => match serde_ipld_dagcbor::from_slice::<KnownRecord>(bytes) {
                        Ok(record) => payloads.push(record),
                        Err(e) => {
                            // 壊れたブロックは「ペイロードなし」と同じ扱い
                            tracing::debug!(
                                "[firehose] undecodable block for {} ({}): {}",
                                raw.path,
                                cid,
                                e
                            );
                        }
                    },
                    None => {
                        tracing::debug!("[firehose] block missing for {} ({})", raw.path, cid);
                    }
                }
            }
        }

        ops.push(RepoOp {
            action,
            path: raw.path.clone(),
            cid: raw.cid,
            payloads,
        });
    }

    Ok(Some(CommitEvent {
        seq: payload.seq,
        repo: payload.repo,
        time: payload.time,
        ops,
    }))
}

/// CAR アーカイブを cid -> バイト列 のマップに展開する
///
/// アーカイブ自体が壊れている場合は空マップを返す。その後の参照が
/// 全て外れて各操作のペイロードが空になるだけで、フレームは落とさない。
async fn read_block_map(blocks: &[u8]) -> HashMap<Cid, Vec<u8>> {
    let mut map = HashMap::new();
    if blocks.is_empty() {
        return map;
    }

    let mut reader = match CarReader::new(blocks).await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("[firehose] malformed block archive: {}", e);
            return map;
        }
    };

    loop {
        match reader.next_block().await {
            Ok(Some((cid, data))) => {
                map.insert(cid, data);
            }
            Ok(None) => break,
            Err(e) => {
                // 途中までは読めていることがあるので、読めた分は使う
                tracing::debug!("[firehose] truncated block archive: {}", e);
                break;
            }
        }
    }

    map
}
