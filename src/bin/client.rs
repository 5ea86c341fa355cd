use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result};
/// 边缘端: 视频采集 + 关键帧上传 + 轻量跟踪 + 检测结果校正
///
/// 运行: cargo run --bin edgetrack-client -- --host 0.0.0.0 --port 9001 \
///        --server-host 127.0.0.1 --server-port 9000 --video-path ./frames --frame-rate 30 --out ./out
use clap::Parser;
use edgetrack::client::{self, ClientOptions};
use edgetrack::PipelineConfig;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 边缘跟踪客户端
#[derive(Parser, Debug)]
#[command(author, version, about = "边缘端目标跟踪", long_about = None)]
struct Args {
    /// 结果接收端监听地址
    #[arg(long)]
    host: String,

    /// 结果接收端监听端口
    #[arg(long)]
    port: u16,

    /// 检测服务地址
    #[arg(long)]
    server_host: String,

    /// 检测服务端口
    #[arg(long)]
    server_port: u16,

    /// 视频帧目录
    #[arg(long)]
    video_path: PathBuf,

    /// 视频帧率
    #[arg(long)]
    frame_rate: u32,

    /// 输出目录
    #[arg(long)]
    out: PathBuf,

    /// 调优参数文件 (JSON, 不存在时写入默认值)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    edgetrack::init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::default(),
    };
    config.log_summary();

    let listen: SocketAddr = (args.host.as_str(), args.port)
        .to_socket_addrs()
        .with_context(|| format!("resolve listen address {}:{}", args.host, args.port))?
        .next()
        .with_context(|| format!("no address for {}:{}", args.host, args.port))?;
    let options = ClientOptions {
        listen,
        server_addr: format!("{}:{}", args.server_host, args.server_port),
        video_path: args.video_path,
        frame_rate: args.frame_rate.max(1),
        out: args.out,
    };

    let running = edgetrack::install_interrupt()?;
    client::run(&options, &config, running)
}
