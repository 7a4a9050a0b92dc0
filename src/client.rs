//! 클라이언트 (재시도 상태 기계)
//!
//! 단일 태스크로 동기식 진행: 핸드쉐이크 → 요청 → 조각 수집 →
//! 누락 조각 복구 루프 → 완료 통지. 모든 수신 대기는 타임아웃으로
//! 제한되고 (바쁜 대기 없음), 재시도 예산이 소진되면 실패 사유와 함께
//! 종료한다. 부분 결과를 완성본처럼 돌려주는 일은 없다.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fragment::Reassembly;
use crate::message::{
    encode_packet, AcknowledgeMessage, ConnectMessage, ErrorMessage, Header, MessageType,
    MissedPacketsMessage, RequestMessage,
};
use crate::session::ClientId;
use crate::stats::TransferStats;
use crate::{Config, HEADER_SIZE, MAX_DATA_SIZE, MAX_PACKET_SIZE};

/// VSP 클라이언트
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: Config,

    /// 보내는 패킷마다 증가하는 일련 번호
    packet_counter: u16,
    recv_buf: Vec<u8>,
    stats: TransferStats,
}

impl Client {
    /// 임시 포트에 바인딩하고 서버 주소를 기억
    pub async fn new(server_addr: SocketAddr, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            server_addr,
            config,
            packet_counter: 0,
            recv_buf: vec![0u8; MAX_PACKET_SIZE],
            stats: TransferStats::default(),
        })
    }

    /// 누적 전송 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 전체 전송 수행
    ///
    /// 성공 시 서버가 생성한 데이터셋 전체를 돌려준다.
    pub async fn run(&mut self, value: f64) -> Result<Vec<f64>> {
        let started = Instant::now();

        let client_id = self.handshake().await?;
        let data = self.request_dataset(client_id, value).await?;
        self.acknowledge(client_id).await?;

        self.stats.elapsed = started.elapsed();
        info!(
            "전송 완료: {} bytes, {:.2}ms, 재전송 라운드 {}회",
            data.len(),
            self.stats.elapsed.as_secs_f64() * 1000.0,
            self.stats.retransmit_rounds
        );

        Ok(data
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect())
    }

    /// Init → AwaitAck
    ///
    /// Connect를 보내고 Acknowledge를 기다린다. 타임아웃마다 재전송,
    /// 재시도 예산 소진 시 실패. 에러 응답은 핸드쉐이크 단계에서는
    /// 복구 불가능하므로 즉시 종료한다.
    async fn handshake(&mut self) -> Result<ClientId> {
        let connect = ConnectMessage::new();

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                self.stats.connect_retries += 1;
                debug!("Connect 재전송 (시도 {})", attempt + 1);
            }
            self.send_single(MessageType::Connect, &connect.to_bytes())
                .await?;

            let deadline = Instant::now() + self.config.connect_timeout();
            while let Some((header, payload)) = self.recv_packet(deadline).await? {
                match header.msg_type {
                    MessageType::Acknowledge => {
                        let ack = AcknowledgeMessage::from_bytes(&payload)?;
                        info!("Acknowledge 수신: client_id={}", ack.client_id);
                        return Ok(ack.client_id);
                    }
                    MessageType::Error => {
                        let error = ErrorMessage::from_bytes(&payload)?;
                        warn!(
                            "핸드쉐이크 거절: {:?} (서버 버전 {}.{})",
                            error.code, error.version_major, error.version_minor
                        );
                        return Err(Error::ServerError(error.code));
                    }
                    other => {
                        debug!("핸드쉐이크 중 예상치 못한 메시지: {:?}", other);
                    }
                }
            }
        }

        Err(Error::NoAcknowledge {
            retries: self.config.max_retries,
        })
    }

    /// Requesting → Collecting ⇄ RequestingMissing
    async fn request_dataset(&mut self, client_id: ClientId, value: f64) -> Result<Bytes> {
        let request = RequestMessage { client_id, value };
        self.send_single(MessageType::Request, &request.to_bytes())
            .await?;

        let mut reassembly: Option<Reassembly> = None;
        let mut retries_left = self.config.max_retries;

        loop {
            // Collecting: 무활동 타임아웃이나 비트맵 완성까지 수신
            self.collect(&mut reassembly).await?;

            match &reassembly {
                Some(r) if r.is_complete() => break,
                Some(r) => {
                    // ComputeMissing → RequestingMissing
                    let missing = r.missing_packets();
                    if retries_left == 0 {
                        return Err(Error::MissingUnrecoverable {
                            missing: missing.len(),
                            retries: self.config.max_retries,
                        });
                    }
                    retries_left -= 1;
                    self.stats.retransmit_rounds += 1;

                    info!("누락 조각 {}개 재요청: {:?}", missing.len(), missing);
                    let missed = MissedPacketsMessage {
                        client_id,
                        packet_numbers: missing,
                    };
                    self.send_single(MessageType::MissedPackets, &missed.to_bytes())
                        .await?;
                }
                None => {
                    // 첫 조각조차 도착하지 않음. 요청 자체를 재전송.
                    if retries_left == 0 {
                        return Err(Error::NoResponse);
                    }
                    retries_left -= 1;
                    debug!("응답 없음, Request 재전송");
                    self.send_single(MessageType::Request, &request.to_bytes())
                        .await?;
                }
            }
        }

        // 완성 상태에서만 루프를 빠져나온다
        let data = reassembly
            .ok_or(Error::NoResponse)?
            .into_data()?;
        Ok(data)
    }

    /// 한 수집 라운드
    ///
    /// 조각이 도착할 때마다 무활동 타임아웃을 리셋한다. 마지막 조각이
    /// 유실되면 `packets_total` 도달을 끝내 확인할 수 없으므로, 타임아웃이
    /// 수집 종료와 완성도 평가 시점을 결정한다.
    async fn collect(&mut self, reassembly: &mut Option<Reassembly>) -> Result<()> {
        loop {
            let deadline = Instant::now() + self.config.response_timeout();
            let Some((header, payload)) = self.recv_packet(deadline).await? else {
                return Ok(()); // 무활동 타임아웃
            };

            match header.msg_type {
                MessageType::Response => {
                    if payload.len() != header.data_size as usize {
                        debug!(
                            "data_size 불일치 ({} != {}), 조각 무시",
                            payload.len(),
                            header.data_size
                        );
                        continue;
                    }

                    if reassembly.is_none() {
                        // 첫 조각이 총 조각 수와 버퍼 크기를 확정한다
                        *reassembly =
                            Some(Reassembly::new(header.packets_total, MAX_DATA_SIZE)?);
                    }
                    let Some(r) = reassembly.as_mut() else {
                        continue;
                    };

                    match r.insert(header.packet_number, &payload) {
                        Ok(true) => {
                            self.stats.packets_received += 1;
                            self.stats.bytes_received += payload.len() as u64;
                        }
                        Ok(false) => self.stats.duplicate_packets += 1,
                        Err(e) => debug!("조각 무시: {}", e),
                    }

                    if r.is_complete() {
                        return Ok(());
                    }
                }
                MessageType::Error => {
                    let error = ErrorMessage::from_bytes(&payload)?;
                    warn!("서버 에러 응답: {:?}", error.code);
                    return Err(Error::ServerError(error.code));
                }
                other => {
                    debug!("수집 중 예상치 못한 메시지: {:?}", other);
                }
            }
        }
    }

    /// Acknowledging → Done
    async fn acknowledge(&mut self, client_id: ClientId) -> Result<()> {
        let ack = AcknowledgeMessage {
            client_id,
            received_packet_number: self.stats.packets_received as u32,
        };
        self.send_single(MessageType::Acknowledge, &ack.to_bytes())
            .await
    }

    /// 단일 패킷 메시지 전송
    async fn send_single(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<()> {
        self.packet_counter = self.packet_counter.wrapping_add(1);
        let header = Header {
            packet_number: self.packet_counter,
            packets_total: 1,
            data_size: payload.len() as u16,
            msg_type,
        };
        self.socket
            .send_to(&encode_packet(&header, payload), self.server_addr)
            .await?;
        Ok(())
    }

    /// 데드라인까지 유효한 패킷 하나 수신
    ///
    /// 형식이 깨진 데이터그램은 건너뛰고 계속 기다린다.
    /// 타임아웃이면 `None`.
    async fn recv_packet(&mut self, deadline: Instant) -> Result<Option<(Header, Bytes)>> {
        loop {
            let now = Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return Ok(None);
            };

            match tokio::time::timeout(remaining, self.socket.recv_from(&mut self.recv_buf)).await
            {
                Ok(Ok((len, _addr))) => match Header::decode(&self.recv_buf[..len]) {
                    Ok(header) => {
                        let payload = Bytes::copy_from_slice(&self.recv_buf[HEADER_SIZE..len]);
                        return Ok(Some((header, payload)));
                    }
                    Err(e) => {
                        debug!("형식 오류 데이터그램 무시: {}", e);
                    }
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(None),
            }
        }
    }
}

/// 결과 아티팩트 기록
///
/// 값을 내림차순 정렬 후 각 값의 고정 폭 이진 표현(8바이트 빅엔디언
/// 비트 패턴)을 구분자 없이 이어 쓴다.
pub fn write_result_artifact(path: impl AsRef<Path>, values: &mut [f64]) -> Result<()> {
    values.sort_by(|a, b| b.total_cmp(a));

    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values.iter() {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    std::fs::write(path, buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::server::{DatasetGenerator, Server, ServerHandle};
    use crate::ErrorCode;

    /// 결정적 생성 규칙: value, value+1, value+2, ...
    fn seq_generator() -> DatasetGenerator {
        Arc::new(|value, amount| (0..amount).map(|i| value + i as f64).collect())
    }

    async fn spawn_server(value_amount: usize) -> ServerHandle {
        let config = Config {
            value_amount,
            ..Config::low_latency()
        };
        Server::with_generator(config, seq_generator())
            .spawn("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    /// 양방향 UDP 릴레이. 서버→클라이언트 방향의 Response 조각 중
    /// `drop` 집합의 번호를 한 번씩 버린다.
    async fn lossy_relay(server_addr: SocketAddr, drop: Vec<u16>) -> SocketAddr {
        let client_side = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_side = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = client_side.local_addr().unwrap();

        tokio::spawn(async move {
            let mut to_drop: HashSet<u16> = drop.into_iter().collect();
            let mut client_addr: Option<SocketAddr> = None;
            let mut up_buf = vec![0u8; MAX_PACKET_SIZE];
            let mut down_buf = vec![0u8; MAX_PACKET_SIZE];

            loop {
                tokio::select! {
                    res = client_side.recv_from(&mut up_buf) => {
                        if let Ok((len, addr)) = res {
                            client_addr = Some(addr);
                            let _ = server_side.send_to(&up_buf[..len], server_addr).await;
                        }
                    }
                    res = server_side.recv_from(&mut down_buf) => {
                        if let Ok((len, _)) = res {
                            if let Ok(header) = Header::decode(&down_buf[..len]) {
                                if header.msg_type == MessageType::Response
                                    && to_drop.remove(&header.packet_number)
                                {
                                    continue;
                                }
                            }
                            if let Some(addr) = client_addr {
                                let _ = client_side.send_to(&down_buf[..len], addr).await;
                            }
                        }
                    }
                }
            }
        });

        relay_addr
    }

    async fn wait_for_release(handle: &ServerHandle) {
        for _ in 0..50 {
            if handle.sessions().live_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("세션이 해제되지 않음");
    }

    #[tokio::test]
    async fn test_end_to_end_clean_transfer() {
        let handle = spawn_server(1200).await;

        let mut client = Client::new(handle.local_addr(), Config::low_latency())
            .await
            .unwrap();
        let values = client.run(5.0).await.unwrap();

        let expected: Vec<f64> = (0..1200).map(|i| 5.0 + i as f64).collect();
        assert_eq!(values, expected);
        assert_eq!(client.stats().retransmit_rounds, 0);

        // 완료 통지 후 세션 회수
        wait_for_release(&handle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_retransmission_recovers_loss() {
        // 1200개 f64 = 9600 bytes = 조각 5개. 2번과 4번을 유실시킨다.
        let handle = spawn_server(1200).await;
        let relay_addr = lossy_relay(handle.local_addr(), vec![2, 4]).await;

        let mut client = Client::new(relay_addr, Config::low_latency()).await.unwrap();
        let values = client.run(5.0).await.unwrap();

        let expected: Vec<f64> = (0..1200).map(|i| 5.0 + i as f64).collect();
        assert_eq!(values, expected);
        assert!(client.stats().retransmit_rounds >= 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_zero_value_then_retry() {
        let handle = spawn_server(100).await;

        let mut client = Client::new(handle.local_addr(), Config::low_latency())
            .await
            .unwrap();
        match client.run(0.0).await {
            Err(Error::ServerError(ErrorCode::InvalidValue)) => {}
            other => panic!("InvalidValue 기대, 실제: {:?}", other.map(|v| v.len())),
        }

        // 값 오류는 복구 가능: 같은 클라이언트가 유효한 값으로 재시도
        let values = client.run(5.0).await.unwrap();
        assert_eq!(values.len(), 100);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_version_mismatch_rejected() {
        let handle = spawn_server(100).await;

        // 클라이언트 API는 항상 올바른 버전을 보내므로 원시 소켓으로 주입
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bad = ConnectMessage {
            version_major: 9,
            version_minor: 0,
        };
        let header = Header::single(MessageType::Connect, ConnectMessage::SIZE as u16);
        socket
            .send_to(&encode_packet(&header, &bad.to_bytes()), handle.local_addr())
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = Header::decode(&buf[..len]).unwrap();
        assert_eq!(reply.msg_type, MessageType::Error);
        let error = ErrorMessage::from_bytes(&buf[HEADER_SIZE..len]).unwrap();
        assert_eq!(error.code, ErrorCode::InvalidVersion);

        // 세션은 생성되지 않음
        assert_eq!(handle.sessions().live_count(), 0);
        handle.shutdown().await;
    }

    #[test]
    fn test_write_result_artifact_sorted_descending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result");

        let mut values = vec![1.0f64, -0.0, -3.5, 0.0, 2.25];
        write_result_artifact(&path, &mut values).unwrap();
        assert_eq!(values, vec![2.25, 1.0, 0.0, -0.0, -3.5]);
        // 전순서: +0.0이 -0.0보다 앞
        assert!(values[2].is_sign_positive());
        assert!(values[3].is_sign_negative());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 40);

        let restored: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_be_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(restored, vec![2.25, 1.0, 0.0, -0.0, -3.5]);
    }
}
