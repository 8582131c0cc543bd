// SSH 会话
// 认证成功后的 russh 会话，为 Shell 和命令执行打开独立通道

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::SshError;
use super::handler::ClientHandler;
use super::shell::{ShellChannel, ShellInput, ShellPeer};
use super::transport::TransportSession;

/// 远端未报告退出状态时使用的退出码
pub const MISSING_EXIT_CODE: u32 = 255;

/// PTY 请求参数
#[derive(Clone, Debug)]
pub struct PtyRequest {
    /// 终端类型
    pub term: String,
    /// 列数
    pub col_width: u32,
    /// 行数
    pub row_height: u32,
    /// 像素宽度
    pub pix_width: u32,
    /// 像素高度
    pub pix_height: u32,
    /// 终端模式
    pub modes: Vec<(russh::Pty, u32)>,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            modes: vec![],
        }
    }
}

/// 命令输出
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
    /// 退出码
    pub exit_code: u32,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// 检查命令是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// russh 会话
pub struct RusshSession {
    handle: Arc<Handle<ClientHandler>>,
    address: String,
}

impl RusshSession {
    pub fn new(handle: Arc<Handle<ClientHandler>>, address: String) -> Self {
        Self { handle, address }
    }

    async fn open_channel(&self) -> Result<Channel<Msg>, SshError> {
        if self.handle.is_closed() {
            return Err(SshError::NotConnected);
        }
        self.handle
            .channel_open_session()
            .await
            .map_err(SshError::from)
    }
}

#[async_trait]
impl TransportSession for RusshSession {
    async fn open_shell(
        &self,
        pty: &PtyRequest,
        cancel: CancellationToken,
    ) -> Result<ShellChannel, SshError> {
        let channel = self.open_channel().await?;

        channel
            .request_pty(
                false,
                &pty.term,
                pty.col_width,
                pty.row_height,
                pty.pix_width,
                pty.pix_height,
                &pty.modes,
            )
            .await
            .map_err(|e| SshError::Channel(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::Channel(format!("Shell request failed: {}", e)))?;

        info!("[Shell] Opened on {}", self.address);
        let (shell, peer) = ShellChannel::pair(pty);
        tokio::spawn(pump_shell(channel, peer, cancel));
        Ok(shell)
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let channel = self.open_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;
        collect_output(channel).await
    }

    async fn keepalive(&self) -> Result<(), SshError> {
        // 打开并关闭一个会话通道：需要服务器应答，能发现半开连接
        let channel = self.open_channel().await?;
        let _ = channel.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) -> Result<(), SshError> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(SshError::from)
    }
}

/// exec 通道消息的累积状态
#[derive(Default)]
struct ExecCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
    closed: bool,
}

impl ExecCollector {
    /// 处理一条消息，返回 true 表示通道已关闭
    fn push(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    self.stderr.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_code = Some(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                debug!("[Exec] Command killed by signal {:?}", signal_name);
            }
            ChannelMsg::Close => self.closed = true,
            _ => {}
        }
        self.closed
    }

    /// 既没有 Close 也没有退出状态时视为传输中断
    fn finish(self) -> Result<CommandOutput, SshError> {
        if !self.closed && self.exit_code.is_none() {
            return Err(SshError::Transport(
                "Channel closed before command completed".to_string(),
            ));
        }
        Ok(CommandOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code.unwrap_or(MISSING_EXIT_CODE),
        })
    }
}

/// 收集 exec 通道的全部输出
///
/// 读取到通道关闭为止，EOF 之后仍可能收到退出状态。
async fn collect_output(mut channel: Channel<Msg>) -> Result<CommandOutput, SshError> {
    let mut collector = ExecCollector::default();
    while let Some(msg) = channel.wait().await {
        if collector.push(msg) {
            break;
        }
    }
    collector.finish()
}

/// Shell 泵任务
///
/// 独占 russh 通道：远端输出推给 ShellPeer，写入 / resize / 关闭请求转发给远端。
async fn pump_shell(mut channel: Channel<Msg>, mut peer: ShellPeer, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = channel.eof().await;
                let _ = channel.close().await;
                break;
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => peer.send_output(data.to_vec()).await,
                Some(ChannelMsg::ExtendedData { data, .. }) => peer.send_output(data.to_vec()).await,
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("[Shell] Remote shell exited with {}", exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            input = peer.recv() => match input {
                Some(ShellInput::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!("[Shell] Write failed: {}", e);
                        break;
                    }
                }
                Some(ShellInput::Resize { cols, rows }) => {
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        debug!("[Shell] Window change failed: {}", e);
                    }
                }
                Some(ShellInput::Close) | None => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
        }
    }
    debug!("[Shell] Channel closed");
}
