//! VSP 클라이언트 - Value Stream Protocol
//!
//! 선택적 재전송 벌크 전송 프로토콜 클라이언트
//! - 핸드쉐이크 → 요청 → 조각 수집 → 누락분만 재요청
//! - 수신 완료 후 내림차순 정렬해 결과 파일 기록
//!
//! 사용법:
//!   cargo run --release --bin vsp-client -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행 (clientconf.json 사용)
//!   cargo run --release --bin vsp-client
//!
//!   # 서버와 값 직접 지정
//!   cargo run --release --bin vsp-client -- --server 127.0.0.1:9000 --value 42.5

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vsp::client::write_result_artifact;
use vsp::{Client, ClientConf, Config, Logger};

/// 클라이언트 실행 설정
struct ClientArgs {
    server: Option<SocketAddr>,
    value: Option<f64>,
    client_conf: PathBuf,
    output: PathBuf,
    log_path: PathBuf,
    config: Config,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            server: None,
            value: None,
            client_conf: PathBuf::from("clientconf.json"),
            output: PathBuf::from("result"),
            log_path: PathBuf::from("client.log"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server = Some(args[i + 1].parse().expect("유효한 주소 필요"));
                    i += 1;
                }
            }
            "--value" | "-v" => {
                if i + 1 < args.len() {
                    parsed.value = Some(args[i + 1].parse().expect("유효한 실수 필요"));
                    i += 1;
                }
            }
            "--client-conf" => {
                if i + 1 < args.len() {
                    parsed.client_conf = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    parsed.config.max_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--response-timeout-ms" => {
                if i + 1 < args.len() {
                    parsed.config.response_timeout_ms =
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
                    r#"VSP Client - Value Stream Protocol 클라이언트

선택적 재전송 벌크 전송 프로토콜 클라이언트
- 누락 패킷 번호만 재요청하여 불필요한 재전송 최소화
- 수신 데이터셋을 내림차순 정렬해 결과 파일로 기록

사용법:
  cargo run --release --bin vsp-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>          서버 주소 (지정 시 clientconf.json보다 우선)
  -v, --value <F>              요청 기준값, 0이 아닌 실수
  --client-conf <PATH>         클라이언트 설정 파일 (기본: clientconf.json)
  -o, --output <PATH>          결과 파일 경로 (기본: result)
  --retries <N>                재시도 예산 (기본: 5)
  --response-timeout-ms <MS>   조각 수신 무활동 타임아웃 (기본: 1000)
  --log <PATH>                 로그 파일 경로 (기본: client.log)
  -h, --help                   이 도움말 출력

예시:
  # 설정 파일로 실행
  cargo run --release --bin vsp-client

  # 서버와 값 직접 지정
  cargo run --release --bin vsp-client -- -s 192.168.0.10:9000 -v 42.5 -o result
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

    let args = parse_args();

    // 명령줄 인자가 없으면 설정 파일에서 읽는다
    let (server_addr, value) = match (args.server, args.value) {
        (Some(addr), Some(value)) => (addr, value),
        (server, value) => {
            let conf = ClientConf::load(&args.client_conf)?;
            let addr = server
                .map(Ok)
                .unwrap_or_else(|| format!("{}:{}", conf.ip, conf.port).parse())?;
            (addr, value.unwrap_or(conf.value))
        }
    };

    info!("VSP Client starting...");
    info!("Server: {}", server_addr);
    info!("Value: {}", value);

    let logger = Logger::new(&args.log_path);
    logger.log(format!("transfer start: server={} value={}", server_addr, value));

    let mut client = Client::new(server_addr, args.config).await?;
    let mut values = match client.run(value).await {
        Ok(values) => values,
        Err(e) => {
            logger.log(format!("transfer failed: {}", e));
            logger.close().await;
            return Err(e.into());
        }
    };

    let stats = client.stats();
    info!("Values received: {}", values.len());
    info!(
        "Packets: {} (duplicates: {}), throughput: {:.2} MB/s",
        stats.packets_received,
        stats.duplicate_packets,
        stats.throughput_bps() / 1_000_000.0
    );
    logger.log(format!(
        "transfer done: values={} packets={} duplicates={} retransmit_rounds={}",
        values.len(),
        stats.packets_received,
        stats.duplicate_packets,
        stats.retransmit_rounds
    ));

    write_result_artifact(&args.output, &mut values)?;
    info!("Result written: {:?}", args.output);
    logger.log(format!("result written: {:?}", args.output));

    logger.close().await;
    Ok(())
}
