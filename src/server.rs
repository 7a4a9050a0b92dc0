//! 서버 파이프라인
//!
//! 수신(Receiver) → 처리(Dispatcher) → 송신(Sender) 세 태스크가
//! 두 개의 유한 큐로 연결되어 동시에 돈다. 각 큐는 단일 생산자/단일
//! 소비자에 가깝게 유지되고 (헤더 불량 에러 회신만 수신 단계가 직접
//! 송신 큐에 넣는다), 세션 테이블의 쓰기는 처리 단계에서만 일어난다.
//!
//! 모든 태스크는 watch 채널의 종료 신호를 블로킹 지점마다 관찰하므로
//! 테스트에서 파이프라인을 결정적으로 시작/정지할 수 있다.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fragment::slice_payload;
use crate::message::{
    encode_packet, AcknowledgeMessage, ConnectMessage, ErrorCode, ErrorMessage, Header,
    MessageType, MissedPacketsMessage, RequestMessage,
};
use crate::session::SessionTable;
use crate::{
    Config, Error, HEADER_SIZE, MAX_DATA_SIZE, MAX_PACKET_SIZE, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR,
};

/// 수신 단계가 처리 단계로 넘기는 패킷
#[derive(Debug)]
struct IncomingPacket {
    peer: SocketAddr,
    data: Bytes,
}

/// 처리 단계가 송신 단계로 넘기는 작업
#[derive(Debug)]
struct OutgoingJob {
    msg_type: MessageType,
    dest: SocketAddr,
    payload: Bytes,

    /// 재전송 시 사용할 조각 번호. `None`이면 1부터 순차 부여.
    /// 번호를 다시 매기지 않아야 수신측 비트맵 슬롯과 일치한다.
    packet_numbers: Option<Vec<u16>>,
}

/// 데이터셋 생성 규칙 (프로토콜 불변량이 아닌 교체 가능한 정책)
pub type DatasetGenerator = Arc<dyn Fn(f64, usize) -> Vec<f64> + Send + Sync>;

/// 기본 데이터셋 생성 규칙
///
/// (-|value|, |value|) 균등분포에서 서로 다른 f64 값 `amount`개를 뽑는다.
/// 중복 판정은 비트 패턴 기준. `value`는 0이 아닌 유한값이어야 하며,
/// 처리 단계가 요청 수리 전에 이를 검증한다.
pub fn generate_dataset(value: f64, amount: usize) -> Vec<f64> {
    let bound = value.abs();
    let mut rng = rand::thread_rng();
    let mut seen: HashSet<u64> = HashSet::with_capacity(amount);
    let mut values = Vec::with_capacity(amount);

    // 범위의 표본 공간이 amount보다 작을 수 있으므로 (극단적으로 작은
    // value) 시도 횟수를 제한하고, 한도 초과 시 중복을 허용해 종료를 보장.
    let max_attempts = amount.saturating_mul(16).saturating_add(1024);
    let mut attempts = 0usize;

    while values.len() < amount {
        let v: f64 = rng.gen_range(-bound..bound);
        attempts += 1;
        if seen.insert(v.to_bits()) || attempts > max_attempts {
            values.push(v);
        }
    }
    values
}

/// f64 시퀀스를 와이어 바이트(리틀엔디언 연속)로 직렬화
pub fn dataset_to_bytes(values: &[f64]) -> Bytes {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(buf)
}

/// VSP 서버
pub struct Server {
    config: Config,
    generator: DatasetGenerator,
}

impl Server {
    /// 기본 생성 규칙으로 서버 구성
    pub fn new(config: Config) -> Self {
        Self {
            config,
            generator: Arc::new(generate_dataset),
        }
    }

    /// 커스텀 생성 규칙으로 서버 구성
    pub fn with_generator(config: Config, generator: DatasetGenerator) -> Self {
        Self { config, generator }
    }

    /// 소켓을 바인딩하고 파이프라인 태스크들을 시작
    pub async fn spawn(self, bind_addr: SocketAddr) -> Result<ServerHandle> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;

        let sessions = Arc::new(SessionTable::new(self.config.max_clients));
        let (packet_tx, packet_rx) = mpsc::channel::<IncomingPacket>(self.config.incoming_queue_size);
        let (job_tx, job_rx) = mpsc::channel::<OutgoingJob>(self.config.outgoing_queue_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("VSP server listening on {}", local_addr);

        let receiver = tokio::spawn(receiver_stage(
            socket.clone(),
            packet_tx,
            job_tx.clone(),
            shutdown_rx.clone(),
        ));

        let dispatcher = Dispatcher {
            config: self.config.clone(),
            sessions: sessions.clone(),
            generator: self.generator,
            job_tx,
        };
        let dispatch = tokio::spawn(dispatcher_stage(dispatcher, packet_rx, shutdown_rx.clone()));

        let sender = tokio::spawn(sender_stage(socket, self.config, job_rx, shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            sessions,
            shutdown_tx,
            tasks: vec![receiver, dispatch, sender],
        })
    }
}

/// 실행 중인 서버 파이프라인의 핸들
pub struct ServerHandle {
    local_addr: SocketAddr,
    sessions: Arc<SessionTable>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// 바인딩된 주소
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 세션 테이블 (관측용)
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// 종료 신호를 보내고 모든 단계가 멈출 때까지 대기
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("VSP server stopped");
    }
}

/// 수신 단계
///
/// 데이터그램을 받아 헤더 크기 미달이면 즉시 InvalidHeader를 회신하고
/// 버리며, 그 외에는 수신 큐로 넘긴다. 세션 작업은 하지 않는다.
async fn receiver_stage(
    socket: Arc<UdpSocket>,
    packet_tx: mpsc::Sender<IncomingPacket>,
    job_tx: mpsc::Sender<OutgoingJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                        continue;
                    }
                };

                if len < HEADER_SIZE {
                    warn!("헤더 크기 미달 데이터그램 ({} bytes) from {}", len, peer);
                    if job_tx.send(error_job(peer, ErrorCode::InvalidHeader)).await.is_err() {
                        break;
                    }
                    continue;
                }

                let packet = IncomingPacket {
                    peer,
                    data: Bytes::copy_from_slice(&buf[..len]),
                };
                if packet_tx.send(packet).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("receiver stage stopped");
}

fn error_job(dest: SocketAddr, code: ErrorCode) -> OutgoingJob {
    OutgoingJob {
        msg_type: MessageType::Error,
        dest,
        payload: Bytes::from(ErrorMessage::new(code).to_bytes()),
        packet_numbers: None,
    }
}

/// 처리 단계의 상태
struct Dispatcher {
    config: Config,
    sessions: Arc<SessionTable>,
    generator: DatasetGenerator,
    job_tx: mpsc::Sender<OutgoingJob>,
}

/// 처리 단계
///
/// 수신 큐에서 패킷을 꺼내 타입별 프로토콜 로직을 적용하고, 주기 틱마다
/// 유휴 세션을 회수한다.
async fn dispatcher_stage(
    dispatcher: Dispatcher,
    mut packet_rx: mpsc::Receiver<IncomingPacket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let idle_timeout = dispatcher.config.session_idle_timeout();
    let mut reap_timer = tokio::time::interval(idle_timeout.max(Duration::from_secs(1)) / 4);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = reap_timer.tick() => {
                let reaped = dispatcher.sessions.reap_idle(idle_timeout);
                if !reaped.is_empty() {
                    info!("유휴 세션 회수: {:?}", reaped);
                }
            }
            maybe = packet_rx.recv() => {
                let Some(packet) = maybe else { break };
                if let Err(e) = dispatcher.handle_packet(packet).await {
                    warn!("메시지 처리 에러: {}", e);
                }
            }
        }
    }

    debug!("dispatcher stage stopped");
}

impl Dispatcher {
    async fn handle_packet(&self, packet: IncomingPacket) -> Result<()> {
        let header = match Header::decode(&packet.data) {
            Ok(h) => h,
            Err(e) => {
                // 형식 오류는 회신 후 버린다. 세션에는 영향 없음.
                debug!("헤더 디코딩 실패 from {}: {}", packet.peer, e);
                return self.reply_error(packet.peer, ErrorCode::InvalidHeader).await;
            }
        };
        let payload = &packet.data[HEADER_SIZE..];

        match header.msg_type {
            MessageType::Connect => self.handle_connect(&header, payload, packet.peer).await,
            MessageType::Request => self.handle_request(payload, packet.peer).await,
            MessageType::MissedPackets => self.handle_missed_packets(payload).await,
            MessageType::Acknowledge => self.handle_acknowledge(payload),
            MessageType::Response | MessageType::Error => {
                // 서버가 받을 일이 없는 타입. 프로토콜 위반으로 기록하고 버림.
                warn!("예상치 못한 메시지 타입 {:?} from {}", header.msg_type, packet.peer);
                Ok(())
            }
        }
    }

    async fn handle_connect(
        &self,
        header: &Header,
        payload: &[u8],
        peer: SocketAddr,
    ) -> Result<()> {
        let connect = match ConnectMessage::from_bytes(payload) {
            Ok(c) => c,
            Err(_) => return self.reply_error(peer, ErrorCode::InvalidHeader).await,
        };

        if connect.version_major != PROTOCOL_VERSION_MAJOR
            || connect.version_minor != PROTOCOL_VERSION_MINOR
        {
            info!(
                "버전 불일치 from {}: {}.{}",
                peer, connect.version_major, connect.version_minor
            );
            return self.reply_error(peer, ErrorCode::InvalidVersion).await;
        }

        let client_id = match self.sessions.allocate(peer) {
            Ok(id) => id,
            Err(Error::PoolExhausted) => {
                // 풀 고갈 시 응답하지 않고 클라이언트 타임아웃에 맡긴다
                warn!("클라이언트 ID 풀 고갈, 연결 거절: {}", peer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!("클라이언트 연결: {} (id={})", peer, client_id);

        let ack = AcknowledgeMessage {
            client_id,
            received_packet_number: header.packet_number as u32,
        };
        self.send_job(OutgoingJob {
            msg_type: MessageType::Acknowledge,
            dest: peer,
            payload: Bytes::from(ack.to_bytes()),
            packet_numbers: None,
        })
        .await
    }

    async fn handle_request(&self, payload: &[u8], peer: SocketAddr) -> Result<()> {
        let request = match RequestMessage::from_bytes(payload) {
            Ok(r) => r,
            Err(_) => return self.reply_error(peer, ErrorCode::InvalidHeader).await,
        };

        let session = self.sessions.get(request.client_id)?;

        if request.value == 0.0 || !request.value.is_finite() {
            // 값 오류(0, NaN, 무한대)는 세션을 유지한 채 거절.
            // 클라이언트는 다른 값으로 재시도 가능.
            self.sessions.touch(request.client_id);
            return self
                .reply_error(session.peer_addr, ErrorCode::InvalidValue)
                .await;
        }

        let values = (self.generator)(request.value, self.config.value_amount);
        let dataset = dataset_to_bytes(&values);
        self.sessions.set_dataset(request.client_id, dataset.clone())?;

        debug!(
            "데이터셋 생성: id={}, value={}, {} bytes",
            request.client_id,
            request.value,
            dataset.len()
        );

        self.send_job(OutgoingJob {
            msg_type: MessageType::Response,
            dest: session.peer_addr,
            payload: dataset,
            packet_numbers: None,
        })
        .await
    }

    async fn handle_missed_packets(&self, payload: &[u8]) -> Result<()> {
        let missed = MissedPacketsMessage::from_bytes(payload)?;
        let session = self.sessions.get(missed.client_id)?;
        self.sessions.touch(missed.client_id);

        debug!(
            "재전송 요청: id={}, {}개 조각",
            missed.client_id,
            missed.packet_numbers.len()
        );

        // 요청된 번호만, 원본 번호 그대로 다시 전송
        self.send_job(OutgoingJob {
            msg_type: MessageType::Response,
            dest: session.peer_addr,
            payload: session.dataset,
            packet_numbers: Some(missed.packet_numbers),
        })
        .await
    }

    fn handle_acknowledge(&self, payload: &[u8]) -> Result<()> {
        let ack = AcknowledgeMessage::from_bytes(payload)?;
        if self.sessions.release(ack.client_id) {
            info!("세션 종료: id={}", ack.client_id);
        } else {
            debug!("이미 해제된 세션에 대한 Acknowledge: id={}", ack.client_id);
        }
        Ok(())
    }

    async fn reply_error(&self, dest: SocketAddr, code: ErrorCode) -> Result<()> {
        self.send_job(error_job(dest, code)).await
    }

    async fn send_job(&self, job: OutgoingJob) -> Result<()> {
        self.job_tx.send(job).await.map_err(|_| Error::ChannelError)
    }
}

/// 송신 단계
///
/// 작업의 페이로드를 조각으로 분할해 데이터그램 단위로 전송한다.
/// 전송 실패는 해당 작업의 남은 조각만 중단하고 단계는 계속 돈다.
async fn sender_stage(
    socket: Arc<UdpSocket>,
    config: Config,
    mut job_rx: mpsc::Receiver<OutgoingJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            maybe = job_rx.recv() => {
                let Some(job) = maybe else { break };
                if let Err(e) = transmit_job(&socket, &config, job).await {
                    warn!("송신 작업 중단: {}", e);
                }
            }
        }
    }

    debug!("sender stage stopped");
}

async fn transmit_job(socket: &UdpSocket, config: &Config, job: OutgoingJob) -> Result<()> {
    let fragments = slice_payload(&job.payload, MAX_DATA_SIZE, job.packet_numbers.as_deref())?;

    for fragment in fragments {
        let header = Header {
            packet_number: fragment.number,
            packets_total: fragment.total,
            data_size: fragment.data.len() as u16,
            msg_type: job.msg_type,
        };
        socket
            .send_to(&encode_packet(&header, &fragment.data), job.dest)
            .await?;

        // 수신 버퍼 오버런 방지용 간이 페이싱
        if config.send_interval_us > 0 {
            tokio::time::sleep(Duration::from_micros(config.send_interval_us)).await;
        }
    }

    Ok(())
}
