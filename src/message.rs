//! 프로토콜 메시지 정의
//!
//! 모든 데이터그램은 고정 7바이트 헤더로 시작하고, 메시지 타입별
//! 페이로드가 뒤따른다. 멀티바이트 정수는 전부 리틀엔디언 고정 레이아웃으로
//! 명시적으로 인코딩/디코딩한다 (버퍼 캐스팅 없음).

use crate::error::{Error, Result};
use crate::HEADER_SIZE;

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// 에러 통지
    Error = 0,

    /// 데이터 요청
    Request = 1,

    /// 확인 응답 (핸드쉐이크 & 세션 종료)
    Acknowledge = 2,

    /// 응답 데이터 조각
    Response = 3,

    /// 누락 패킷 재전송 요청
    MissedPackets = 4,

    /// 연결 요청
    Connect = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::Error),
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Acknowledge),
            3 => Ok(MessageType::Response),
            4 => Ok(MessageType::MissedPackets),
            5 => Ok(MessageType::Connect),
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

/// 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// 프로토콜 버전 불일치
    InvalidVersion = 0,

    /// 유효하지 않은 요청 값 (0)
    InvalidValue = 1,

    /// 헤더 크기 미달 / 형식 오류
    InvalidHeader = 2,
}

impl TryFrom<u8> for ErrorCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ErrorCode::InvalidVersion),
            1 => Ok(ErrorCode::InvalidValue),
            2 => Ok(ErrorCode::InvalidHeader),
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

/// 패킷 헤더
///
/// `packet_number`는 논리 메시지 내 1부터 시작하는 조각 번호,
/// `packets_total`은 논리 메시지의 총 조각 수.
/// `data_size`는 **이 조각의** 페이로드 크기 (논리 메시지 전체 크기 아님).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// 조각 번호 (1-based)
    pub packet_number: u16,

    /// 총 조각 수
    pub packets_total: u16,

    /// 이 조각의 페이로드 크기 (바이트)
    pub data_size: u16,

    /// 메시지 타입
    pub msg_type: MessageType,
}

impl Header {
    /// 단일 패킷 메시지용 헤더 (핸드쉐이크, 요청 등)
    pub fn single(msg_type: MessageType, data_size: u16) -> Self {
        Self {
            packet_number: 1,
            packets_total: 1,
            data_size,
            msg_type,
        }
    }

    /// 헤더를 고정 레이아웃으로 직렬화
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.packet_number.to_le_bytes());
        buf[2..4].copy_from_slice(&self.packets_total.to_le_bytes());
        buf[4..6].copy_from_slice(&self.data_size.to_le_bytes());
        buf[6] = self.msg_type as u8;
        buf
    }

    /// 바이트에서 헤더 디코딩
    ///
    /// 입력이 헤더 크기보다 짧으면 데이터를 해석하지 않고 실패한다.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader {
                len: bytes.len(),
                min: HEADER_SIZE,
            });
        }

        Ok(Self {
            packet_number: u16::from_le_bytes([bytes[0], bytes[1]]),
            packets_total: u16::from_le_bytes([bytes[2], bytes[3]]),
            data_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            msg_type: MessageType::try_from(bytes[6])?,
        })
    }
}

/// 헤더 + 페이로드를 하나의 데이터그램 버퍼로 결합
pub fn encode_packet(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn check_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() < expected {
        return Err(Error::TruncatedPayload {
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}

/// 연결 요청 페이로드 (클라이언트 → 서버)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectMessage {
    pub version_major: u8,
    pub version_minor: u8,
}

impl ConnectMessage {
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self {
            version_major: crate::PROTOCOL_VERSION_MAJOR,
            version_minor: crate::PROTOCOL_VERSION_MINOR,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![self.version_major, self.version_minor]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            version_major: bytes[0],
            version_minor: bytes[1],
        })
    }
}

impl Default for ConnectMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// 데이터 요청 페이로드 (클라이언트 → 서버)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestMessage {
    pub client_id: u32,
    pub value: f64,
}

impl RequestMessage {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.client_id.to_le_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            client_id: read_u32(bytes, 0),
            value: f64::from_le_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
            ]),
        })
    }
}

/// 확인 응답 페이로드 (양방향)
///
/// 서버 → 클라이언트: 핸드쉐이크 응답 (할당된 client_id 전달).
/// 클라이언트 → 서버: 전송 완료 통지 (세션 해제 신호).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    pub client_id: u32,
    pub received_packet_number: u32,
}

impl AcknowledgeMessage {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.client_id.to_le_bytes());
        buf.extend_from_slice(&self.received_packet_number.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            client_id: read_u32(bytes, 0),
            received_packet_number: read_u32(bytes, 4),
        })
    }
}

/// 누락 패킷 재전송 요청 페이로드 (클라이언트 → 서버)
///
/// 클라이언트가 보내는 유일한 재전송 요청. 누락된 조각 번호만 나열하여
/// 업링크 부담을 최소화한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedPacketsMessage {
    pub client_id: u32,
    pub packet_numbers: Vec<u16>,
}

impl MissedPacketsMessage {
    /// 고정부 크기: client_id(4) + total_packets_missed(2)
    pub const FIXED_SIZE: usize = 6;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::FIXED_SIZE + self.packet_numbers.len() * 2);
        buf.extend_from_slice(&self.client_id.to_le_bytes());
        buf.extend_from_slice(&(self.packet_numbers.len() as u16).to_le_bytes());
        for n in &self.packet_numbers {
            buf.extend_from_slice(&n.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::FIXED_SIZE)?;
        let client_id = read_u32(bytes, 0);
        let total = read_u16(bytes, 4) as usize;
        check_len(bytes, Self::FIXED_SIZE + total * 2)?;

        let packet_numbers = (0..total)
            .map(|i| read_u16(bytes, Self::FIXED_SIZE + i * 2))
            .collect();

        Ok(Self {
            client_id,
            packet_numbers,
        })
    }
}

/// 에러 통지 페이로드 (서버 → 클라이언트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub version_major: u8,
    pub version_minor: u8,
}

impl ErrorMessage {
    pub const SIZE: usize = 3;

    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            version_major: crate::PROTOCOL_VERSION_MAJOR,
            version_minor: crate::PROTOCOL_VERSION_MINOR,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![self.code as u8, self.version_major, self.version_minor]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            code: ErrorCode::try_from(bytes[0])?,
            version_major: bytes[1],
            version_minor: bytes[2],
        })
    }
}
