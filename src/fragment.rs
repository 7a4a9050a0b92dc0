//! 조각 분할과 조립
//!
//! 송수신 양쪽이 공유하는 대칭 알고리즘:
//! - 분할: 길이 L의 버퍼를 조각 크기 S로 `ceil(L / S)`개의 1-based 조각으로 자름
//! - 조립: 조각 번호 기준 오프셋에 기록, 비트맵으로 완성/누락 판정
//!
//! 재전송 시에도 조각 번호는 원본 메시지 기준 번호를 그대로 유지한다.
//! 수신측 비트맵 슬롯과 같은 인덱스로 주소 지정이 가능해야 하기 때문.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// 분할된 조각 하나
#[derive(Debug, Clone)]
pub struct Fragment {
    /// 조각 번호 (1-based, 원본 메시지 기준)
    pub number: u16,

    /// 총 조각 수
    pub total: u16,

    /// 조각 페이로드
    pub data: Bytes,
}

/// 총 조각 수 계산
fn fragment_count(len: usize, fragment_size: usize) -> Result<u16> {
    if len == 0 {
        return Err(Error::EmptyPayload);
    }
    let needed = (len + fragment_size - 1) / fragment_size;
    if needed > u16::MAX as usize {
        return Err(Error::TooManyFragments {
            needed,
            max: u16::MAX as usize,
        });
    }
    Ok(needed as u16)
}

/// 페이로드를 조각들로 분할
///
/// `numbers`가 `None`이면 1부터 순차 번호를 매기고, `Some`이면 요청된
/// 번호의 조각만 원본과 동일한 분할 규칙으로 다시 잘라낸다 (재전송 경로).
pub fn slice_payload(
    payload: &Bytes,
    fragment_size: usize,
    numbers: Option<&[u16]>,
) -> Result<Vec<Fragment>> {
    let total = fragment_count(payload.len(), fragment_size)?;

    let slice_at = |number: u16| -> Result<Fragment> {
        if number == 0 || number > total {
            return Err(Error::InvalidPacketNumber {
                packet_number: number,
                packets_total: total,
            });
        }
        let start = (number as usize - 1) * fragment_size;
        let end = (start + fragment_size).min(payload.len());
        Ok(Fragment {
            number,
            total,
            data: payload.slice(start..end),
        })
    };

    match numbers {
        Some(requested) => requested.iter().map(|&n| slice_at(n)).collect(),
        None => (1..=total).map(slice_at).collect(),
    }
}

/// 수신측 조립 버퍼
///
/// 첫 조각 도착 시점에야 `packets_total`을 알 수 있으므로 지연 생성된다.
/// 목적지 버퍼는 `total * fragment_size`로 잡고, 마지막 조각이 도착하면
/// 정확한 전체 길이를 기록해 두었다가 완성 시 잘라낸다.
#[derive(Debug)]
pub struct Reassembly {
    fragment_size: usize,
    total: u16,
    buf: BytesMut,

    /// 수신 비트맵 (인덱스 0 == 조각 번호 1)
    received: Vec<bool>,
    received_count: u32,

    /// 마지막 조각 도착 후 확정되는 전체 길이
    final_len: Option<usize>,
}

impl Reassembly {
    /// 새 조립 버퍼 생성
    ///
    /// 조각 0개짜리 논리 메시지는 유효하지 않다.
    pub fn new(packets_total: u16, fragment_size: usize) -> Result<Self> {
        if packets_total == 0 || fragment_size == 0 {
            return Err(Error::EmptyPayload);
        }

        let capacity = packets_total as usize * fragment_size;
        let mut buf = BytesMut::with_capacity(capacity);
        buf.resize(capacity, 0);

        Ok(Self {
            fragment_size,
            total: packets_total,
            buf,
            received: vec![false; packets_total as usize],
            received_count: 0,
            final_len: None,
        })
    }

    /// 총 조각 수
    pub fn packets_total(&self) -> u16 {
        self.total
    }

    /// 조각 삽입
    ///
    /// 같은 조각의 재도착은 멱등적이며 `Ok(false)`를 돌려준다.
    /// 도착 순서는 무관하고 오프셋은 조각 번호로만 결정된다.
    pub fn insert(&mut self, packet_number: u16, data: &[u8]) -> Result<bool> {
        if packet_number == 0 || packet_number > self.total {
            return Err(Error::InvalidPacketNumber {
                packet_number,
                packets_total: self.total,
            });
        }

        let is_last = packet_number == self.total;
        if data.len() > self.fragment_size || (!is_last && data.len() != self.fragment_size) {
            return Err(Error::TruncatedPayload {
                expected: self.fragment_size,
                got: data.len(),
            });
        }

        if is_last {
            self.final_len =
                Some((self.total as usize - 1) * self.fragment_size + data.len());
        }

        let offset = (packet_number as usize - 1) * self.fragment_size;
        self.buf[offset..offset + data.len()].copy_from_slice(data);

        let slot = &mut self.received[packet_number as usize - 1];
        if *slot {
            return Ok(false);
        }
        *slot = true;
        self.received_count += 1;
        Ok(true)
    }

    /// 모든 조각이 도착했는지
    pub fn is_complete(&self) -> bool {
        self.received_count as usize == self.total as usize
    }

    /// 누락된 조각 번호 목록 (1-based)
    pub fn missing_packets(&self) -> Vec<u16> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, &got)| !got)
            .map(|(idx, _)| (idx + 1) as u16)
            .collect()
    }

    /// 완성된 데이터 추출
    ///
    /// 마지막 조각이 조각 크기보다 짧을 수 있으므로 확정 길이로 잘라낸다.
    pub fn into_data(mut self) -> Result<Bytes> {
        if !self.is_complete() {
            return Err(Error::Incomplete {
                missing: self.missing_packets().len(),
            });
        }

        // 완성 상태라면 마지막 조각은 반드시 도착했음
        let final_len = self.final_len.unwrap_or(self.buf.len());
        self.buf.truncate(final_len);
        Ok(self.buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(fragments: &[Fragment], fragment_size: usize) -> Bytes {
        let mut r = Reassembly::new(fragments[0].total, fragment_size).unwrap();
        for f in fragments {
            r.insert(f.number, &f.data).unwrap();
        }
        r.into_data().unwrap()
    }

    #[test]
    fn test_slice_reassemble_roundtrip() {
        let payload = Bytes::from((0u8..=250).cycle().take(480).collect::<Vec<u8>>());

        for fragment_size in [1usize, 7, 100, 479, 480, 500] {
            let fragments = slice_payload(&payload, fragment_size, None).unwrap();
            let expected = (payload.len() + fragment_size - 1) / fragment_size;
            assert_eq!(fragments.len(), expected);

            let restored = reassemble(&fragments, fragment_size);
            assert_eq!(restored, payload, "fragment_size={}", fragment_size);
        }
    }

    #[test]
    fn test_slice_empty_payload() {
        let err = slice_payload(&Bytes::new(), 100, None).unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
    }

    #[test]
    fn test_slice_explicit_numbers_keep_original_numbering() {
        let payload = Bytes::from(vec![7u8; 480]);
        let all = slice_payload(&payload, 100, None).unwrap();
        let retransmit = slice_payload(&payload, 100, Some(&[2, 4])).unwrap();

        assert_eq!(retransmit.len(), 2);
        assert_eq!(retransmit[0].number, 2);
        assert_eq!(retransmit[1].number, 4);
        assert_eq!(retransmit[0].total, all[0].total);
        assert_eq!(retransmit[0].data, all[1].data);
        assert_eq!(retransmit[1].data, all[3].data);
    }

    #[test]
    fn test_slice_explicit_number_out_of_range() {
        let payload = Bytes::from(vec![1u8; 100]);
        let err = slice_payload(&payload, 100, Some(&[2])).unwrap_err();
        assert!(matches!(err, Error::InvalidPacketNumber { .. }));
    }

    #[test]
    fn test_insert_idempotent() {
        let payload = Bytes::from((0u8..250).collect::<Vec<u8>>());
        let fragments = slice_payload(&payload, 100, None).unwrap();

        let mut r = Reassembly::new(3, 100).unwrap();
        assert!(r.insert(1, &fragments[0].data).unwrap());
        assert!(!r.insert(1, &fragments[0].data).unwrap());
        assert_eq!(r.missing_packets(), vec![2, 3]);

        r.insert(2, &fragments[1].data).unwrap();
        r.insert(3, &fragments[2].data).unwrap();
        assert_eq!(r.into_data().unwrap(), payload);
    }

    #[test]
    fn test_missing_set_is_complement() {
        let payload = Bytes::from(vec![9u8; 1000]);
        let fragments = slice_payload(&payload, 100, None).unwrap();

        let mut r = Reassembly::new(10, 100).unwrap();
        for number in [1u16, 3, 5, 10] {
            r.insert(number, &fragments[number as usize - 1].data).unwrap();
        }

        assert!(!r.is_complete());
        assert_eq!(r.missing_packets(), vec![2, 4, 6, 7, 8, 9]);
    }

    #[test]
    fn test_out_of_order_arrival() {
        let payload = Bytes::from((0u8..=255).collect::<Vec<u8>>());
        let fragments = slice_payload(&payload, 50, None).unwrap();

        let mut r = Reassembly::new(fragments[0].total, 50).unwrap();
        // 마지막 조각 먼저
        for f in fragments.iter().rev() {
            r.insert(f.number, &f.data).unwrap();
        }
        assert_eq!(r.into_data().unwrap(), payload);
    }

    #[test]
    fn test_zero_fragments_invalid() {
        assert!(matches!(Reassembly::new(0, 100), Err(Error::EmptyPayload)));
    }

    #[test]
    fn test_incomplete_extraction_fails() {
        let mut r = Reassembly::new(2, 4).unwrap();
        r.insert(1, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(r.into_data(), Err(Error::Incomplete { missing: 1 })));
    }

    #[test]
    fn test_insert_rejects_bad_number() {
        let mut r = Reassembly::new(2, 4).unwrap();
        assert!(matches!(
            r.insert(0, &[0u8; 4]),
            Err(Error::InvalidPacketNumber { .. })
        ));
        assert!(matches!(
            r.insert(3, &[0u8; 4]),
            Err(Error::InvalidPacketNumber { .. })
        ));
    }

    #[test]
    fn test_short_final_fragment_truncates() {
        let mut r = Reassembly::new(2, 100).unwrap();
        r.insert(1, &[5u8; 100]).unwrap();
        r.insert(2, &[6u8; 30]).unwrap();

        let data = r.into_data().unwrap();
        assert_eq!(data.len(), 130);
        assert_eq!(&data[100..], &[6u8; 30][..]);
    }
}
