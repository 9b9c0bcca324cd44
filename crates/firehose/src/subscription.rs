//! 購読接続の管理
//!
//! 1 本の接続は `run_subscription` が面倒を見る。トランスポートエラーは
//! すべてその接続の終わりとして扱い、内部ではリトライしない。復旧は
//! `run_with_reconnect` が新しい接続を張り直すことでのみ行う。
//! 再接続をまたぐ取りこぼしは仕様上許容している (カーソル再開はしない)。

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::wire::{decode_frame, CommitEvent, CommitPayload, RawRepoOp};

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// 中継サーバーのベース URL (例: `wss://bsky.network`)
    pub endpoint: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    /// この時間以上生きた接続のあとはリトライ回数を仕切り直す
    pub reset_retries_min_ms: u64,
    /// フレームが届かないまま経過したら強制切断する (ゾンビ接続対策)
    pub idle_timeout_secs: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://bsky.network".to_string(),
            base_delay_ms: 5000,
            max_delay_ms: 30000,
            max_retries: 300,
            reset_retries_min_ms: 60000,
            idle_timeout_secs: 60,
        }
    }
}

impl SubscriptionConfig {
    pub fn subscribe_url(&self) -> String {
        format!("{}/xrpc/com.atproto.sync.subscribeRepos", self.endpoint)
    }
}

/// 1 本の接続を張ってフレームを処理し続ける
///
/// - 戻り値 `Ok(())` はキャンセルトークンによる正常終了
/// - 戻り値 `Err(_)` は接続の死 (トランスポートエラー / エラーフレーム /
///   アイドルタイムアウト)。close 相当の後始末は済んでいる
///
/// デコードできた commit ごとに `on_message` を 1 回呼ぶ。操作単位への
/// 分配は呼び出し側の仕事。
pub async fn run_subscription<F, P>(
    url: &str,
    idle_timeout: Duration,
    shutdown: &CancellationToken,
    op_filter: &mut P,
    on_message: &mut F,
) -> Result<()>
where
    F: FnMut(CommitEvent),
    P: FnMut(&CommitPayload, &RawRepoOp) -> bool,
{
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .context("Failed to connect subscription")?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut ping = tokio::time::interval(Duration::from_secs(30));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // 二重 close しても相手が無視するだけなので結果は見ない
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = ping.tick() => {
                if last_frame.elapsed() >= idle_timeout {
                    anyhow::bail!(
                        "no frames for {}s, suspected zombie connection",
                        idle_timeout.as_secs()
                    );
                }
                ws_tx
                    .send(Message::Ping(Vec::new()))
                    .await
                    .context("Failed to send keepalive ping")?;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else {
                    anyhow::bail!("connection closed by remote");
                };
                let msg = msg.context("websocket transport error")?;
                last_frame = Instant::now();

                match msg {
                    Message::Binary(data) => {
                        // エラーフレームはここで Err になり、接続ごと終わる
                        if let Some(event) = decode_frame(&data, &mut *op_filter).await? {
                            on_message(event);
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => {
                        anyhow::bail!("connection closed by remote");
                    }
                    _ => {}
                }
            }
        }
    }
}

/// 再接続ループ
///
/// 指数バックオフ付きで接続を張り直し続ける。最初の接続より後の
/// 張り直し直前には `on_reopen(attempt)` を呼ぶので、呼び出し側は
/// 「取りこぼしがあったかもしれない」印の挿入などに使える。
/// キャンセルトークンはバックオフ待ちの最中でも効く。
pub async fn run_with_reconnect<F, P, R>(
    config: &SubscriptionConfig,
    shutdown: CancellationToken,
    mut op_filter: P,
    mut on_message: F,
    mut on_reopen: R,
) -> Result<()>
where
    F: FnMut(CommitEvent),
    P: FnMut(&CommitPayload, &RawRepoOp) -> bool,
    R: FnMut(u32),
{
    let url = config.subscribe_url();
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
    let mut delay_ms = config.base_delay_ms;
    let mut attempts: u32 = 0;
    let mut reopened = false;

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        if reopened {
            on_reopen(attempts);
        }

        tracing::info!("[firehose] connecting to {}", url);
        let connected_at = Instant::now();
        let result = run_subscription(
            &url,
            idle_timeout,
            &shutdown,
            &mut op_filter,
            &mut on_message,
        )
        .await;

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }

                // 十分長く生きていた接続のあとの失敗は一時的なものとみなす
                if connected_at.elapsed() >= Duration::from_millis(config.reset_retries_min_ms) {
                    attempts = 0;
                    delay_ms = config.base_delay_ms;
                }

                attempts += 1;
                if attempts > config.max_retries {
                    return Err(e.context("subscription retries exhausted"));
                }

                tracing::warn!(
                    "[firehose] connection lost: {}. Reconnecting in {}ms (attempt {})",
                    e,
                    delay_ms,
                    attempts
                );
                reopened = true;

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
                delay_ms = (delay_ms * 2).min(config.max_delay_ms);
            }
        }
    }
}
