// 非交互式命令执行
//
// 每次执行都在连接上打开独立的 exec 通道，与交互式 Shell 互不影响。
// 并发执行数受信号量限制，超出的调用排队等待，不会被丢弃。

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use super::connection::TransportConnection;
use super::error::SshError;
use super::session::CommandOutput;

/// 默认并发上限
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// 命令执行通道
#[derive(Clone)]
pub struct CommandChannel {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl CommandChannel {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 执行命令，收集 stdout / stderr / 退出码
    pub async fn execute(
        &self,
        conn: &TransportConnection,
        command: &str,
    ) -> Result<CommandOutput, SshError> {
        let session = conn.session()?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SshError::Channel("Command channel closed".to_string()))?;

        debug!("[Exec] {}", command);
        let output = session.exec(command).await?;
        debug!(
            "[Exec] Finished with code {} ({} bytes stdout, {} bytes stderr)",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }
}
