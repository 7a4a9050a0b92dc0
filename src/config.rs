//! 프로토콜 설정
//!
//! 튜닝 노브는 평범한 구조체(`Config`)로, 파일 기반 설정은
//! JSON(`serverconf.json`, `protocolconf.json`, `clientconf.json`)으로 읽는다.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::session::DEFAULT_MAX_CLIENTS;

/// VSP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 세션당 생성할 값 개수
    pub value_amount: usize,

    /// 최대 동시 세션 수 (클라이언트 ID 풀 크기)
    pub max_clients: usize,

    /// 조각 전송 간격 (마이크로초)
    /// 수신측 버퍼 오버런을 피하기 위한 간이 흐름 제어. 0이면 최대 속도.
    pub send_interval_us: u64,

    /// 핸드쉐이크 응답 대기 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 조각 수신 무활동 타임아웃 (밀리초)
    /// 조각이 도착할 때마다 리셋된다.
    pub response_timeout_ms: u64,

    /// 재시도 예산 (핸드쉐이크 재전송 / 누락 패킷 요청 라운드)
    pub max_retries: u32,

    /// 유휴 세션 회수 기준 (밀리초)
    pub session_idle_timeout_ms: u64,

    /// 수신 큐 크기 (패킷 수)
    pub incoming_queue_size: usize,

    /// 송신 큐 크기 (작업 수)
    pub outgoing_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            value_amount: 1000,
            max_clients: DEFAULT_MAX_CLIENTS,
            send_interval_us: 50,            // 패킷당 50us
            connect_timeout_ms: 10_000,      // 10초
            response_timeout_ms: 1_000,      // 1초, 조각마다 리셋
            max_retries: 5,
            session_idle_timeout_ms: 60_000, // 60초
            incoming_queue_size: 1024,
            outgoing_queue_size: 1024,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 루프백/테스트용 설정 (페이싱 없음, 짧은 타임아웃)
    pub fn low_latency() -> Self {
        Self {
            send_interval_us: 0,
            connect_timeout_ms: 1_000,
            response_timeout_ms: 200,
            session_idle_timeout_ms: 5_000,
            ..Self::default()
        }
    }

    /// 핸드쉐이크 타임아웃
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 무활동 타임아웃
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// 유휴 세션 회수 기준
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// 서버 설정 파일 (`serverconf.json`)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConf {
    /// 바인드 포트
    pub port: u16,
}

impl ServerConf {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }
}

/// 프로토콜 설정 파일 (`protocolconf.json`)
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConf {
    pub version_major: u8,
    pub version_minor: u8,

    /// 세션당 생성할 값 개수
    pub value_amount: usize,
}

impl ProtocolConf {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }
}

/// 클라이언트 설정 파일 (`clientconf.json`)
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConf {
    /// 서버 포트
    pub port: u16,

    /// 서버 IP
    pub ip: String,

    /// 요청 값 (데이터셋 범위를 결정)
    pub value: f64,
}

impl ClientConf {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_server_conf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 8888 }}"#).unwrap();

        let conf = ServerConf::load(file.path()).unwrap();
        assert_eq!(conf.port, 8888);
    }

    #[test]
    fn test_load_protocol_conf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "version_major": 1, "version_minor": 0, "value_amount": 500 }}"#
        )
        .unwrap();

        let conf = ProtocolConf::load(file.path()).unwrap();
        assert_eq!(conf.version_major, 1);
        assert_eq!(conf.value_amount, 500);
    }

    #[test]
    fn test_load_client_conf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": 8888, "ip": "127.0.0.1", "value": 25.5 }}"#
        )
        .unwrap();

        let conf = ClientConf::load(file.path()).unwrap();
        assert_eq!(conf.ip, "127.0.0.1");
        assert_eq!(conf.value, 25.5);
    }

    #[test]
    fn test_load_malformed_conf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ServerConf::load(file.path()).is_err());
    }
}
