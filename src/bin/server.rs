//! VSP 서버 - Value Stream Protocol
//!
//! 선택적 재전송 벌크 전송 프로토콜 서버
//! - 수신/처리/송신 3단계 파이프라인
//! - 누락 패킷 번호 기반 선택적 재전송
//!
//! 사용법:
//!   cargo run --release --bin vsp-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행 (serverconf.json / protocolconf.json 사용)
//!   cargo run --release --bin vsp-server
//!
//!   # 포트 직접 지정
//!   cargo run --release --bin vsp-server -- --port 9000 --value-amount 100000

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vsp::{
    Config, Logger, ProtocolConf, Server, ServerConf, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR,
};

/// 서버 실행 설정
struct ServerArgs {
    port: Option<u16>,
    server_conf: PathBuf,
    protocol_conf: PathBuf,
    log_path: PathBuf,
    config: Config,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            port: None,
            server_conf: PathBuf::from("serverconf.json"),
            protocol_conf: PathBuf::from("protocolconf.json"),
            log_path: PathBuf::from("server.log"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    parsed.port = Some(args[i + 1].parse().expect("유효한 포트 필요"));
                    i += 1;
                }
            }
            "--server-conf" => {
                if i + 1 < args.len() {
                    parsed.server_conf = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--protocol-conf" => {
                if i + 1 < args.len() {
                    parsed.protocol_conf = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--value-amount" => {
                if i + 1 < args.len() {
                    parsed.config.value_amount = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--max-clients" => {
                if i + 1 < args.len() {
                    parsed.config.max_clients = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--send-interval-us" => {
                if i + 1 < args.len() {
                    parsed.config.send_interval_us =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--log" => {
                if i + 1 < args.len() {
                    parsed.log_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"VSP Server - Value Stream Protocol 서버

선택적 재전송 벌크 전송 프로토콜 서버
- 수신/처리/송신 3단계 파이프라인
- Connect/Request/MissedPackets/Acknowledge 처리

사용법:
  cargo run --release --bin vsp-server -- [OPTIONS]

옵션:
  -p, --port <PORT>          바인드 포트 (지정 시 serverconf.json보다 우선)
  --server-conf <PATH>       서버 설정 파일 (기본: serverconf.json)
  --protocol-conf <PATH>     프로토콜 설정 파일 (기본: protocolconf.json)
  --value-amount <N>         세션당 생성 값 개수 (기본: 1000)
  --max-clients <N>          최대 동시 세션 수 (기본: 256)
  --send-interval-us <US>    조각 전송 간격 마이크로초, 0이면 최대 속도 (기본: 50)
  --log <PATH>               로그 파일 경로 (기본: server.log)
  -h, --help                 이 도움말 출력

예시:
  # 설정 파일로 실행
  cargo run --release --bin vsp-server

  # 포트와 값 개수 직접 지정
  cargo run --release --bin vsp-server -- -p 9000 --value-amount 100000
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = parse_args();

    // 설정 파일 로드 (명령줄 인자가 우선)
    let port = match args.port {
        Some(port) => port,
        None => {
            let conf = ServerConf::load(&args.server_conf)?;
            conf.port
        }
    };

    if args.protocol_conf.exists() {
        let proto = ProtocolConf::load(&args.protocol_conf)?;
        if proto.version_major != PROTOCOL_VERSION_MAJOR
            || proto.version_minor != PROTOCOL_VERSION_MINOR
        {
            warn!(
                "프로토콜 설정 버전 {}.{} 무시, 빌드 버전 {}.{} 사용",
                proto.version_major,
                proto.version_minor,
                PROTOCOL_VERSION_MAJOR,
                PROTOCOL_VERSION_MINOR
            );
        }
        args.config.value_amount = proto.value_amount;
    }

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    info!("VSP Server starting...");
    info!("Bind address: {}", bind_addr);
    info!("Value amount: {}", args.config.value_amount);
    info!("Max clients: {}", args.config.max_clients);
    info!(
        "Protocol version: {}.{}",
        PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR
    );

    let logger = Logger::new(&args.log_path);
    logger.log(format!("server start: {}", bind_addr));

    let handle = Server::new(args.config).spawn(bind_addr).await?;
    info!("Server listening on {}", handle.local_addr());

    // Ctrl-C까지 실행
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    logger.log("server shutdown");

    handle.shutdown().await;
    logger.close().await;

    Ok(())
}
