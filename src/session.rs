//! 세션 레지스트리 (서버측)
//!
//! 클라이언트 ID는 유한 풀(기본 0..256)에서 꺼내 쓰고 세션 종료 시 반환한다.
//! 프리 리스트와 세션 슬롯 배열은 단일 뮤텍스 아래에서만 변경되므로
//! 할당과 첫 기록 사이에 끼어드는 갱신이 없다. ID는 프리 리스트에 있거나
//! 살아있는 세션 하나를 가리키거나 둘 중 하나다.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// 클라이언트 식별자 (와이어 상 u32)
pub type ClientId = u32;

/// 기본 최대 동시 세션 수
pub const DEFAULT_MAX_CLIENTS: usize = 256;

/// 세션 레코드
#[derive(Debug, Clone)]
pub struct Session {
    /// 할당된 클라이언트 ID
    pub client_id: ClientId,

    /// 피어 주소
    pub peer_addr: SocketAddr,

    /// 이 세션을 위해 생성된 데이터셋 (f64 리틀엔디언 연속 바이트)
    pub dataset: Bytes,

    /// 마지막 활동 시각 (유휴 세션 회수용)
    pub last_activity: Instant,
}

impl Session {
    /// 데이터셋 바이트 크기
    pub fn dataset_size(&self) -> usize {
        self.dataset.len()
    }
}

struct Inner {
    free_ids: VecDeque<ClientId>,
    slots: Vec<Option<Session>>,
}

/// 세션 테이블
pub struct SessionTable {
    inner: Mutex<Inner>,
}

impl SessionTable {
    /// 풀 크기를 지정하여 생성
    pub fn new(max_clients: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                free_ids: (0..max_clients as ClientId).collect(),
                slots: (0..max_clients).map(|_| None).collect(),
            }),
        }
    }

    /// 새 세션 할당
    ///
    /// 풀이 비어 있으면 `PoolExhausted`. 이때 연결 요청은 응답 없이
    /// 거절되고 클라이언트 쪽 타임아웃에 맡긴다.
    pub fn allocate(&self, peer_addr: SocketAddr) -> Result<ClientId> {
        let mut inner = self.inner.lock();
        let client_id = inner.free_ids.pop_front().ok_or(Error::PoolExhausted)?;

        inner.slots[client_id as usize] = Some(Session {
            client_id,
            peer_addr,
            dataset: Bytes::new(),
            last_activity: Instant::now(),
        });

        Ok(client_id)
    }

    /// 세션 해제, ID를 풀로 반환
    ///
    /// 이미 해제되었거나 범위 밖이면 `false` (이중 해제 방지).
    pub fn release(&self, client_id: ClientId) -> bool {
        let mut inner = self.inner.lock();
        let idx = client_id as usize;
        if idx >= inner.slots.len() || inner.slots[idx].is_none() {
            return false;
        }
        inner.slots[idx] = None;
        inner.free_ids.push_back(client_id);
        true
    }

    /// 세션 조회 (스냅샷 복사, 데이터셋은 참조 카운트 공유)
    pub fn get(&self, client_id: ClientId) -> Result<Session> {
        let inner = self.inner.lock();
        inner
            .slots
            .get(client_id as usize)
            .and_then(|slot| slot.clone())
            .ok_or(Error::UnknownClient { client_id })
    }

    /// 생성된 데이터셋을 세션에 저장
    pub fn set_dataset(&self, client_id: ClientId, dataset: Bytes) -> Result<()> {
        let mut inner = self.inner.lock();
        let session = inner
            .slots
            .get_mut(client_id as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Error::UnknownClient { client_id })?;

        session.dataset = dataset;
        session.last_activity = Instant::now();
        Ok(())
    }

    /// 활동 시각 갱신
    pub fn touch(&self, client_id: ClientId) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner
            .slots
            .get_mut(client_id as usize)
            .and_then(|slot| slot.as_mut())
        {
            session.last_activity = Instant::now();
        }
    }

    /// 유휴 세션 회수
    ///
    /// 최종 Acknowledge 없이 사라진 클라이언트의 ID가 누수되지 않도록
    /// `max_idle` 이상 활동이 없는 세션을 해제하고 해제된 ID를 돌려준다.
    pub fn reap_idle(&self, max_idle: Duration) -> Vec<ClientId> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let mut reaped = Vec::new();

        for slot in inner.slots.iter_mut() {
            if let Some(session) = slot {
                if now.duration_since(session.last_activity) >= max_idle {
                    reaped.push(session.client_id);
                    *slot = None;
                }
            }
        }
        for &client_id in &reaped {
            inner.free_ids.push_back(client_id);
        }

        reaped
    }

    /// 현재 살아있는 세션 수
    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLIENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_allocate_and_get() {
        let table = SessionTable::new(4);
        let id = table.allocate(peer()).unwrap();

        let session = table.get(id).unwrap();
        assert_eq!(session.client_id, id);
        assert_eq!(session.peer_addr, peer());
        assert!(session.dataset.is_empty());
    }

    #[test]
    fn test_pool_exhaustion() {
        let table = SessionTable::new(2);
        table.allocate(peer()).unwrap();
        table.allocate(peer()).unwrap();
        assert!(matches!(table.allocate(peer()), Err(Error::PoolExhausted)));
    }

    #[test]
    fn test_release_and_reuse() {
        let table = SessionTable::new(1);
        let id = table.allocate(peer()).unwrap();
        assert!(table.release(id));

        // 반환된 ID는 재사용 가능, 이중 할당은 불가
        let id2 = table.allocate(peer()).unwrap();
        assert_eq!(id, id2);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_double_release() {
        let table = SessionTable::new(2);
        let id = table.allocate(peer()).unwrap();
        assert!(table.release(id));
        assert!(!table.release(id));
        assert!(!table.release(999));
    }

    #[test]
    fn test_get_unknown_client() {
        let table = SessionTable::new(2);
        assert!(matches!(
            table.get(0),
            Err(Error::UnknownClient { client_id: 0 })
        ));
        assert!(matches!(table.get(500), Err(Error::UnknownClient { .. })));
    }

    #[test]
    fn test_set_dataset() {
        let table = SessionTable::new(2);
        let id = table.allocate(peer()).unwrap();
        table.set_dataset(id, Bytes::from(vec![1u8, 2, 3])).unwrap();

        assert_eq!(table.get(id).unwrap().dataset_size(), 3);
        assert!(table
            .set_dataset(id + 1, Bytes::new())
            .is_err());
    }

    #[test]
    fn test_reap_idle() {
        let table = SessionTable::new(2);
        let id = table.allocate(peer()).unwrap();

        // 아직 유휴 아님
        assert!(table.reap_idle(Duration::from_secs(60)).is_empty());

        let reaped = table.reap_idle(Duration::ZERO);
        assert_eq!(reaped, vec![id]);
        assert_eq!(table.live_count(), 0);

        // 회수된 ID는 다시 할당 가능
        assert!(table.allocate(peer()).is_ok());
    }
}
