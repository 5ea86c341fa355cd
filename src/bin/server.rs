use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result};
/// 检测服务: 接收关键帧 → 只检测最新帧 → 回传结果
///
/// 运行: cargo run --bin edgetrack-server --release -- --host 0.0.0.0 --port 9000 \
///        --client-host 127.0.0.1 --client-port 9001
use clap::Parser;
use edgetrack::server::{self, ServerOptions};
use edgetrack::PipelineConfig;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 目标检测服务
#[derive(Parser, Debug)]
#[command(author, version, about = "目标检测服务", long_about = None)]
struct Args {
    /// 帧接收端监听地址
    #[arg(long)]
    host: String,

    /// 帧接收端监听端口
    #[arg(long)]
    port: u16,

    /// 边缘端地址
    #[arg(long)]
    client_host: String,

    /// 边缘端结果端口
    #[arg(long)]
    client_port: u16,

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
    let options = ServerOptions {
        listen,
        client_addr: format!("{}:{}", args.client_host, args.client_port),
    };

    let running = edgetrack::install_interrupt()?;
    server::run(&options, &config, running)
}
