//! 백그라운드 파일 로거
//!
//! 타임스탬프가 붙은 한 줄 메시지를 전용 태스크가 append 모드로 기록한다.
//! 호출측은 채널에 밀어 넣기만 하므로 절대 블로킹되지 않는다.
//! 프로세스 공통 관측은 `tracing`이 담당하고, 이 로거는 전송 세션의
//! 영속 기록(원본 설계의 logs.txt)을 남기는 용도다.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// 비동기 append 전용 텍스트 로거
pub struct Logger {
    tx: Option<mpsc::UnboundedSender<String>>,
    handle: Option<JoinHandle<()>>,
}

impl Logger {
    /// 로거 생성, 기록 태스크 시작
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let stamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let line = format!(
                    "[{}.{:03}] {}\n",
                    stamp.as_secs(),
                    stamp.subsec_millis(),
                    message
                );

                let result = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .and_then(|mut file| file.write_all(line.as_bytes()));

                if let Err(e) = result {
                    warn!("로그 파일 기록 실패: {}", e);
                }
            }
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// 메시지 기록 (비차단)
    pub fn log(&self, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message.into());
        }
    }

    /// 남은 메시지를 모두 기록하고 종료
    pub async fn close(mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logger_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.txt");

        let logger = Logger::new(&path);
        logger.log("first");
        logger.log("second");
        logger.close().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
        assert!(lines[0].starts_with('['));
    }
}
