//! ハッシュタグ検索のバックフィル (過去ログの遡り読み込み)
//!
//! 検索エンドポイントは新しい順でヒットを返すが、画面は下に行くほど
//! 新しい時系列で積み上げるため、ページ単位で古い順に並べ替えて返す。

pub mod api;
pub mod engine;

pub use api::{HttpSearchApi, SearchApi};
pub use engine::{SearchEngine, FETCH_BATCH_SIZE};
