// 交互式 Shell 通道
//
// ShellChannel 是调用方持有的一端；ShellPeer 由传输实现持有，
// 在后台任务中把远程 PTY 的输出推入、把写入 / resize 请求取出。

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::TransportConnection;
use super::error::SshError;
use super::session::PtyRequest;

/// 写入队列长度
const INPUT_BUFFER: usize = 64;
/// 输出队列长度（满时远端输出暂停读取）
const OUTPUT_BUFFER: usize = 256;

/// 发往远程 PTY 的请求
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellInput {
    Data(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Close,
}

/// 交互式 Shell 通道
pub struct ShellChannel {
    input: mpsc::Sender<ShellInput>,
    reader: Mutex<Option<ShellReader>>,
    open: Arc<AtomicBool>,
    /// (rows, cols)
    size: Mutex<(u32, u32)>,
    term: String,
}

impl ShellChannel {
    /// 创建通道的两端（供 Transport 实现使用）
    pub fn pair(pty: &PtyRequest) -> (ShellChannel, ShellPeer) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let open = Arc::new(AtomicBool::new(true));

        let channel = ShellChannel {
            input: input_tx,
            reader: Mutex::new(Some(ShellReader { rx: output_rx })),
            open: open.clone(),
            size: Mutex::new((pty.row_height, pty.col_width)),
            term: pty.term.clone(),
        };
        let peer = ShellPeer {
            input: input_rx,
            output: output_tx,
            open,
        };
        (channel, peer)
    }

    /// 在 Ready 连接上打开 PTY Shell
    pub async fn open(
        conn: &TransportConnection,
        rows: u32,
        cols: u32,
        term: &str,
    ) -> Result<ShellChannel, SshError> {
        let session = conn.session()?;
        let pty = PtyRequest {
            term: term.to_string(),
            col_width: cols,
            row_height: rows,
            ..PtyRequest::default()
        };
        debug!("[Shell] Requesting PTY {}x{} ({})", cols, rows, term);
        session.open_shell(&pty, conn.channel_scope()).await
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// 当前尺寸 (rows, cols)
    pub fn size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    /// 取出输出流（只能取一次）
    pub fn take_reader(&self) -> Option<ShellReader> {
        self.reader.lock().take()
    }

    /// 写入数据
    pub async fn write(&self, data: &[u8]) -> Result<(), SshError> {
        if !self.is_open() {
            return Err(SshError::ChannelNotActive);
        }
        self.input
            .send(ShellInput::Data(data.to_vec()))
            .await
            .map_err(|_| SshError::ChannelNotActive)
    }

    /// 调整终端尺寸，通道未打开时忽略
    pub async fn resize(&self, rows: u32, cols: u32) {
        if !self.is_open() {
            return;
        }
        *self.size.lock() = (rows, cols);
        if self.input.send(ShellInput::Resize { cols, rows }).await.is_err() {
            debug!("[Shell] Resize dropped, channel already closed");
        }
    }

    /// 关闭 Shell（不关闭底层连接）
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.input.send(ShellInput::Close).await;
        }
    }
}

/// Shell 输出流
///
/// 按远端发送顺序产出字节块，通道或连接关闭后结束。
pub struct ShellReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ShellReader {
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl Stream for ShellReader {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// 通道的传输端
pub struct ShellPeer {
    input: mpsc::Receiver<ShellInput>,
    output: mpsc::Sender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl ShellPeer {
    /// 等待下一个请求，调用方端被 drop 后返回 None
    pub async fn recv(&mut self) -> Option<ShellInput> {
        self.input.recv().await
    }

    /// 推送远端输出
    ///
    /// 输出队列已满时等待。读取端已被丢弃时数据直接丢弃。
    pub async fn send_output(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        if self.output.send(chunk).await.is_err() {
            debug!("[Shell] Output reader dropped, discarding data");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for ShellPeer {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
