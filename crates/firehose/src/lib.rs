//! リポジトリイベント購読 (firehose) のデコードと接続管理
//!
//! ワイヤ上のフレームは「ヘッダ + ペイロード」の 2 つの DAG-CBOR 値を
//! 連結したバイナリ。commit ペイロードには CAR 形式のブロックアーカイブが
//! 埋め込まれており、create / update 操作のレコードはそこから取り出す。

pub mod records;
pub mod subscription;
pub mod wire;

pub use records::{FollowRecord, KnownRecord, LikeRecord, PostRecord, RepostRecord};
pub use subscription::{run_subscription, run_with_reconnect, SubscriptionConfig};
pub use wire::{decode_frame, CommitEvent, CommitPayload, OpAction, RawRepoOp, RepoOp};
