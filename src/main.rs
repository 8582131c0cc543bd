// termpal - SSH 终端客户端
// 命令行入口

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use termpal::models::{AuthType, ProfileDraft};
use termpal::services::{
    default_data_dir, KeyManager, KnownHostsStore, ProfileStore, SettingsService, StorageBackend,
};
use termpal::ssh::{RusshTransport, SessionConfig, SessionManager, ShellOptions};

/// 主密码环境变量（启用加密存储）
const MASTER_PASSWORD_ENV: &str = "TERMPAL_MASTER_PASSWORD";

#[derive(Parser)]
#[command(name = "termpal", version, about = "SSH terminal client")]
struct Cli {
    /// 数据目录（默认为系统配置目录下的 termpal）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出连接配置
    Profiles,
    /// 添加连接配置
    Add {
        name: String,
        /// user@host
        destination: String,
        #[arg(short, long)]
        port: Option<u16>,
        /// 使用已保存的密钥认证
        #[arg(long, conflicts_with = "password")]
        key: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// 打开交互式 Shell
    Shell { profile_id: String },
    /// 执行一条命令
    Exec {
        profile_id: String,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// 生成 Ed25519 密钥
    Keygen { name: String },
}

struct App {
    profiles: ProfileStore,
    keys: KeyManager,
    settings: SettingsService,
    storage: Arc<StorageBackend>,
}

impl App {
    fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let dir = match data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        let master = std::env::var(MASTER_PASSWORD_ENV).ok();
        let storage = Arc::new(StorageBackend::probe(&dir, master.as_deref())?);
        Ok(Self {
            profiles: ProfileStore::new(storage.clone()),
            keys: KeyManager::new(storage.clone()),
            settings: SettingsService::new(storage.clone()),
            storage,
        })
    }

    fn session_manager(&self) -> Result<SessionManager> {
        let settings = self.settings.get()?;
        let known_hosts =
            KnownHostsStore::new(self.storage.clone(), settings.connection.host_key_policy);
        Ok(SessionManager::new(
            SessionConfig::from_settings(&settings.connection),
            Arc::new(self.profiles.clone()),
            Arc::new(self.keys.clone()),
            Arc::new(RusshTransport::new(Arc::new(known_hosts))),
        ))
    }
}

fn main() -> ExitCode {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别；日志写到 stderr，不干扰终端输出
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ssh-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let app = App::open(cli.data_dir)?;

    match cli.command {
        Command::Profiles => {
            for profile in app.profiles.all()? {
                println!(
                    "{}\t{}\t{}@{}:{}",
                    profile.id, profile.name, profile.username, profile.host, profile.port
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Add {
            name,
            destination,
            port,
            key,
            password,
        } => {
            let (username, host) = destination
                .split_once('@')
                .context("Destination must be user@host")?;
            let default_port = app.settings.get()?.connection.default_port;
            let auth_type = if key.is_some() {
                AuthType::Key
            } else {
                AuthType::Password
            };
            let profile = app.profiles.create(ProfileDraft {
                name,
                host: host.to_string(),
                port: port.unwrap_or(default_port),
                username: username.to_string(),
                key_id: key,
                password,
                auth_type,
            })?;
            println!("{}", profile.id);
            Ok(ExitCode::SUCCESS)
        }
        Command::Keygen { name } => {
            let key = app.keys.generate(&name)?;
            println!("{}", key.public_key);
            eprintln!("Fingerprint: {}", key.fingerprint);
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec {
            profile_id,
            command,
        } => {
            let manager = app.session_manager()?;
            manager.connect(&profile_id).await?;
            let result = manager.execute_command(&command.join(" ")).await;
            manager.disconnect().await;

            let output = result?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&output.stdout).await?;
            stdout.flush().await?;
            let mut stderr = tokio::io::stderr();
            stderr.write_all(&output.stderr).await?;
            stderr.flush().await?;
            Ok(ExitCode::from(u8::try_from(output.exit_code).unwrap_or(u8::MAX)))
        }
        Command::Shell { profile_id } => {
            let manager = app.session_manager()?;
            manager.connect(&profile_id).await?;
            let result = interactive_shell(&manager).await;
            manager.disconnect().await;
            result.map(|_| ExitCode::SUCCESS)
        }
    }
}

/// 退出时恢复终端模式
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("无法进入 raw 模式")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

fn shell_options(size: (u16, u16)) -> ShellOptions {
    ShellOptions {
        rows: Some(size.1 as u32),
        cols: Some(size.0 as u32),
        term: std::env::var("TERM").ok(),
    }
}

async fn interactive_shell(manager: &SessionManager) -> Result<()> {
    let mut size = crossterm::terminal::size().unwrap_or((80, 24));
    let mut data = manager.subscribe_data();
    let mut states = manager.subscribe_state();
    manager.open_shell(Some(shell_options(size))).await?;

    let _raw = RawModeGuard::enable()?;

    // 标准输入在独立任务中读取
    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(32);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            Some(chunk) = data.recv() => {
                stdout.write_all(&chunk).await?;
                stdout.flush().await?;
            }
            Some(state) = states.recv() => {
                if !state.connected {
                    if let Some(error) = state.error.as_ref() {
                        let mut stderr = std::io::stderr();
                        let _ = write!(stderr, "\r\n[termpal] {}\r\n", error);
                    }
                }
            }
            input = input_rx.recv() => match input {
                Some(bytes) => {
                    // 重连期间的输入直接丢弃
                    let _ = manager.send_data(&bytes).await;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Ok(current) = crossterm::terminal::size() {
                    if current != size {
                        size = current;
                        manager.resize(size.1 as u32, size.0 as u32).await;
                    }
                }
                // 自动重连期间由 SessionManager 负责恢复 Shell
                let state = manager.state();
                let reconnecting = manager.is_reconnecting();
                if state.connected && !reconnecting && !manager.has_shell() {
                    break;
                }
                if !state.connected && !state.connecting && !reconnecting {
                    bail!(state.error.unwrap_or_else(|| "Disconnected".to_string()));
                }
            }
        }
    }
    Ok(())
}
