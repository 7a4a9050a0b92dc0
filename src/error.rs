//! 에러 타입 정의

use thiserror::Error;

/// VSP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("설정 파싱 에러: {0}")]
    Config(#[from] serde_json::Error),

    #[error("유효하지 않은 헤더: {len} 바이트 (최소 {min} 바이트)")]
    InvalidHeader { len: usize, min: usize },

    #[error("알 수 없는 메시지 타입: {0}")]
    UnknownMessageType(u8),

    #[error("유효하지 않은 프로토콜 버전: expected {expected_major}.{expected_minor}, got {got_major}.{got_minor}")]
    InvalidVersion {
        expected_major: u8,
        expected_minor: u8,
        got_major: u8,
        got_minor: u8,
    },

    #[error("유효하지 않은 요청 값: 0은 허용되지 않음")]
    InvalidValue,

    #[error("페이로드 길이 부족: expected {expected}, got {got}")]
    TruncatedPayload { expected: usize, got: usize },

    #[error("빈 페이로드는 분할할 수 없음")]
    EmptyPayload,

    #[error("조각 수 초과: {needed}개 (최대 {max})")]
    TooManyFragments { needed: usize, max: usize },

    #[error("논리 메시지 미완성: {missing}개 조각 누락")]
    Incomplete { missing: usize },

    #[error("유효하지 않은 패킷 번호: {packet_number} (총 {packets_total})")]
    InvalidPacketNumber {
        packet_number: u16,
        packets_total: u16,
    },

    #[error("클라이언트 ID 풀 고갈")]
    PoolExhausted,

    #[error("알 수 없는 클라이언트: id={client_id}")]
    UnknownClient { client_id: u32 },

    #[error("채널 에러")]
    ChannelError,

    #[error("Acknowledge 수신 실패: 재시도 {retries}회 소진")]
    NoAcknowledge { retries: u32 },

    #[error("응답 수신 실패: 서버 응답 없음")]
    NoResponse,

    #[error("누락 패킷 복구 실패: {missing}개 남음 (재시도 {retries}회 소진)")]
    MissingUnrecoverable { missing: usize, retries: u32 },

    #[error("서버 에러 응답: {0:?}")]
    ServerError(crate::message::ErrorCode),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
