use regex::Regex;
use std::sync::OnceLock;

static DELIMITER_REGEX: OnceLock<Regex> = OnceLock::new();

/// 本文がハッシュタグスコープに該当するかを判定する
///
/// 空白とよくある区切り記号 (`. , ; ! ? ' "`) でトークンに割り、
/// トークン単位の完全一致 (大文字小文字は無視) だけを認める。
/// 部分一致を許すと `#zib2` が `#zib2x` の中にもマッチしてしまう。
pub fn matches_hashtag(text: &str, hashtag: &str) -> bool {
    let regex = DELIMITER_REGEX.get_or_init(|| Regex::new(r#"[ \t\r\n.,;!?'"]+"#).unwrap());
    let needle = hashtag.to_lowercase();
    regex.split(text).any(|token| token.to_lowercase() == needle)
}
