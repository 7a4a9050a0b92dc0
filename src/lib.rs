//! # VSP (Value Stream Protocol)
//!
//! UDP 기반 선택적 재전송 벌크 전송 프로토콜
//!
//! ## 핵심 특징
//! - **선택적 재전송**: 누락된 패킷 번호만 다시 요청
//! - **조각 조립**: 응답을 고정 크기 패킷으로 분할, 비트맵으로 조립
//! - **핸드쉐이크**: Connect/Acknowledge로 세션 확립 후 데이터 요청
//! - **3단계 파이프라인**: 수신/처리/송신 태스크가 큐로 연결되어 비차단 동작
//! - **유한 재시도**: 클라이언트의 모든 대기는 타임아웃과 재시도 예산으로 제한

pub mod client;
pub mod config;
pub mod error;
pub mod fragment;
pub mod logger;
pub mod message;
pub mod server;
pub mod session;
pub mod stats;

pub use client::{write_result_artifact, Client};
pub use config::{ClientConf, Config, ProtocolConf, ServerConf};
pub use error::{Error, Result};
pub use fragment::{slice_payload, Reassembly};
pub use logger::Logger;
pub use message::{ErrorCode, Header, MessageType};
pub use server::{Server, ServerHandle};
pub use session::{ClientId, Session, SessionTable};
pub use stats::TransferStats;

/// 프로토콜 버전 (major)
pub const PROTOCOL_VERSION_MAJOR: u8 = 1;

/// 프로토콜 버전 (minor)
pub const PROTOCOL_VERSION_MINOR: u8 = 0;

/// 최대 데이터그램 크기 (헤더 포함, 바이트)
pub const MAX_PACKET_SIZE: usize = 2048;

/// 패킷 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 7;

/// 패킷당 최대 페이로드 크기 (바이트)
pub const MAX_DATA_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;
