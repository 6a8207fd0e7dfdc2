use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};
use super::registry::TaskRegistry;
use super::traits::{TransferReport, Transport};
use super::types::{ManagerCommand, UploadConfig, UploadEvent};
use super::worker::UploadWorker;

pub struct UploadManagerWorker {
    transport: Arc<dyn Transport>,
    config: UploadConfig,
    registry: TaskRegistry,

    event_tx: broadcast::Sender<UploadEvent>,
    report_tx: mpsc::UnboundedSender<TransferReport>,
    report_rx: mpsc::UnboundedReceiver<TransferReport>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        transport: Arc<dyn Transport>,
        config: UploadConfig,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let registry = TaskRegistry::new(config.concurrent, config.auto_start, config.sample_window);
        let mut inactivity_check = interval(config.inactivity_check_interval());
        inactivity_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut worker = Self {
            transport,
            config,
            registry,
            event_tx,
            report_tx,
            report_rx,
        };

        info!(concurrent = worker.config.concurrent, "upload manager started");

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        worker.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => worker.handle_command(command),
                    None => {
                        worker.shutdown();
                        break;
                    }
                },
                Some(report) = worker.report_rx.recv() => {
                    worker.handle_report(report);
                }
                _ = inactivity_check.tick() => {
                    let expired = worker.registry.expire_inactive(
                        Instant::now().into_std(),
                        worker.config.inactivity_timeout,
                    );
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "inactive uploads expired");
                    }
                }
            }

            worker.process_queue();
            worker.flush_events();
        }

        info!("upload manager stopped");
    }

    /// 在并发上限内启动等待中的任务
    fn process_queue(&mut self) {
        while let Some(admitted) = self.registry.admit_next(Instant::now().into_std()) {
            let worker = UploadWorker {
                transport: self.transport.clone(),
                cancellation_token: admitted.cancellation,
                report_tx: self.report_tx.clone(),
            };
            tokio::spawn(worker.run(admitted.request));
        }
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Enqueue { file, content_hash, metadata, reply } => {
                let result = self.registry.enqueue(file, content_hash, metadata);
                let _ = reply.send(result);
            }
            ManagerCommand::Start { upload_id, reply } => {
                let _ = reply.send(self.registry.start(upload_id));
            }
            ManagerCommand::Cancel { upload_id, reply } => {
                let _ = reply.send(self.registry.cancel(upload_id));
            }
            ManagerCommand::CancelAll { reply } => {
                let _ = reply.send(self.registry.cancel_all());
            }
            ManagerCommand::Retry { upload_id, reply } => {
                let _ = reply.send(self.registry.retry(upload_id));
            }
            ManagerCommand::GetTask { upload_id, reply } => {
                let _ = reply.send(self.registry.get(&upload_id).cloned());
            }
            ManagerCommand::GetAllTasks { reply } => {
                let _ = reply.send(self.registry.snapshot_all());
            }
            ManagerCommand::Clean { reply } => {
                let _ = reply.send(self.registry.clean());
            }
            ManagerCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_report(&mut self, report: TransferReport) {
        match report {
            TransferReport::Progress { upload_id, bytes, at } => {
                self.registry.on_progress(upload_id, bytes, at);
            }
            TransferReport::Finished { upload_id, outcome } => {
                self.registry.on_complete(upload_id, outcome);
            }
        }
    }

    fn shutdown(&mut self) {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "cancelled unfinished uploads on shutdown");
        }
        self.flush_events();
    }

    /// 广播事件，没有订阅者时直接丢弃
    fn flush_events(&mut self) {
        for event in self.registry.take_events() {
            let _ = self.event_tx.send(event);
        }
    }
}
