//! 전송 통계

use std::time::Duration;

/// 한 전송 세션의 누적 통계 (클라이언트측)
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 수신한 응답 조각 수 (중복 제외)
    pub packets_received: u64,

    /// 중복 수신된 조각 수
    pub duplicate_packets: u64,

    /// 수신한 페이로드 바이트 수
    pub bytes_received: u64,

    /// 핸드쉐이크 재전송 횟수
    pub connect_retries: u32,

    /// 누락 패킷 요청 라운드 수
    pub retransmit_rounds: u32,

    /// 전송 소요 시간
    pub elapsed: Duration,
}

impl TransferStats {
    /// 초당 수신 바이트
    pub fn throughput_bps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / secs
    }

    /// 조각 중복률 (0.0 ~ 1.0)
    pub fn duplicate_ratio(&self) -> f64 {
        let total = self.packets_received + self.duplicate_packets;
        if total == 0 {
            return 0.0;
        }
        self.duplicate_packets as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        let stats = TransferStats {
            bytes_received: 1000,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.throughput_bps(), 500.0);
        assert_eq!(TransferStats::default().throughput_bps(), 0.0);
    }

    #[test]
    fn test_duplicate_ratio() {
        let stats = TransferStats {
            packets_received: 9,
            duplicate_packets: 1,
            ..Default::default()
        };
        assert!((stats.duplicate_ratio() - 0.1).abs() < 1e-9);
    }
}
