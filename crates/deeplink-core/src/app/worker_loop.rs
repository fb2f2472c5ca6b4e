//! DispatchWorker - キュー排出ループ
//!
//! 1 本のタスクが `process_next_queue_item` を Idle / Paused まで回し、
//! その後は kick（enqueue・init・close・接続回復）か shutdown を待つ。
//! in-flight 1 本の保証は orchestrator 側の permit が持つので、
//! ここは起床と停止だけを扱う。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::orchestrator::{Progress, SessionOrchestrator};

/// Worker handle.
/// - `request_shutdown()` でループを止める（送信中の 1 本は中断され、キューに残る）
/// - `shutdown_and_join()` でループの終了を待てる
pub struct DispatchWorker {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatchWorker {
    pub fn spawn(orchestrator: Arc<SessionOrchestrator>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            dispatch_loop(orchestrator, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn dispatch_loop(orchestrator: Arc<SessionOrchestrator>, shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let progress = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            progress = orchestrator.process_next_queue_item() => progress,
        };
        if progress == Progress::Dispatched {
            continue;
        }

        // 何も出せない: 次の kick まで寝る
        debug!(?progress, pending = orchestrator.queue().len(), "dispatch loop parked");
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = orchestrator.kicked() => {}
        }
    }
    debug!("dispatch loop stopped");
}
