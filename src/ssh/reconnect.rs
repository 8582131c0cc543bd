// SSH 自动重连模块
//
// 连接意外断开后按指数退避重新连接：首次等待 initial_delay，
// 每次失败后翻倍，不超过 max_delay。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use super::config::ReconnectConfig;
use super::error::SshError;

/// 指数退避
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay, config.max_delay)
    }

    /// 下一次重试前的等待时间
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(prev) => prev.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// 重连结果
#[derive(Debug)]
pub enum ReconnectOutcome {
    Reconnected { attempts: u32 },
    /// 遇到不可重试的错误
    GaveUp(SshError),
}

/// 重连循环
///
/// 每次等待退避时间后调用 `attempt`，成功或遇到不可重试的错误时结束。
pub async fn run<F, Fut>(mut backoff: Backoff, mut attempt: F) -> ReconnectOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), SshError>>,
{
    let mut n = 1u32;
    loop {
        let delay = backoff.next_delay();
        info!("[Reconnect] Attempt {} in {}s", n, delay.as_secs_f32());
        tokio::time::sleep(delay).await;

        match attempt(n).await {
            Ok(()) => {
                info!("[Reconnect] Reconnected after {} attempt(s)", n);
                return ReconnectOutcome::Reconnected { attempts: n };
            }
            Err(e) if !e.is_retryable() => {
                warn!("[Reconnect] Giving up: {}", e);
                return ReconnectOutcome::GaveUp(e);
            }
            Err(e) => {
                warn!("[Reconnect] Attempt {} failed: {}", n, e);
            }
        }
        n += 1;
    }
}
