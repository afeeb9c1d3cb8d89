use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::error_log::{ErrorLog, ErrorRecord};
use super::errors::{ErrorKind, PipelineError};
use super::session::SessionContext;
use crate::core::extraction::{parse_response, ExtractionError, ExtractionResult, PromptSpec, Validator};
use crate::core::inference::InferenceDispatcher;
use crate::core::queue::{Outcome, QueueError, WorkItem, WorkQueue};
use crate::core::store::ExtractionStore;
use crate::core::worker::{RunFlag, Worker};

#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    /// 两轮扫描之间的间隔
    pub poll_interval: Duration,
    /// 扫描出错后的退避
    pub error_backoff: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// 一轮扫描的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
    /// 终态移动失败的文件数，文件仍留在 input 但本进程不再处理
    pub stranded: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.processed + self.failed + self.stranded
    }
}

/// 推理流水线：input 目录 → 模型提取 → 校验 → 入库 → processed / failed
pub struct ExtractionPipeline {
    queue: Mutex<WorkQueue>,
    dispatcher: InferenceDispatcher,
    validator: Validator,
    prompts: Vec<PromptSpec>,
    store: Option<Arc<dyn ExtractionStore>>,
    session: SessionContext,
    error_log: ErrorLog,
    timing: MonitorTiming,
}

impl ExtractionPipeline {
    pub fn new(queue: WorkQueue, dispatcher: InferenceDispatcher, prompts: Vec<PromptSpec>) -> Self {
        if prompts.is_empty() {
            warn!("⚠️ No extraction prompts configured, every image will produce an empty result");
        }
        let error_log = ErrorLog::new(&queue.dirs().failed);
        Self {
            queue: Mutex::new(queue),
            dispatcher,
            validator: Validator::new(),
            prompts,
            store: None,
            session: SessionContext::new(),
            error_log,
            timing: MonitorTiming::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ExtractionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = session;
        self
    }

    pub fn with_timing(mut self, timing: MonitorTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn prompts(&self) -> &[PromptSpec] {
        &self.prompts
    }

    pub fn timing(&self) -> MonitorTiming {
        self.timing
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        self.queue().pending_count()
    }

    fn queue(&self) -> MutexGuard<'_, WorkQueue> {
        // 监控线程 panic 后锁可能中毒，集合本身仍然可用
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 按配置顺序跑完所有 prompt，任何一个失败则整张图片失败
    pub fn extract(&self, item: &WorkItem) -> Result<ExtractionResult, PipelineError> {
        let mut result = ExtractionResult::new(&item.file_name, self.session.snapshot());

        for spec in &self.prompts {
            info!(
                "🔍 Extracting {} from {}",
                spec.extraction_type, item.file_name
            );
            let raw = self
                .dispatcher
                .infer(&item.path, &spec.prompt)
                .map_err(|source| PipelineError::Dispatch {
                    extraction_type: spec.extraction_type.clone(),
                    source,
                })?;

            let parsed = parse_response(&raw).map_err(|e| match e {
                ExtractionError::Malformed { message, .. } => PipelineError::Malformed {
                    extraction_type: spec.extraction_type.clone(),
                    message,
                    response: raw.clone(),
                },
                other => PipelineError::Validation {
                    extraction_type: spec.extraction_type.clone(),
                    source: other,
                    response: raw.clone(),
                },
            })?;

            self.validator
                .validate(&parsed, &spec.extraction_type)
                .map_err(|source| PipelineError::Validation {
                    extraction_type: spec.extraction_type.clone(),
                    source,
                    response: raw.clone(),
                })?;

            debug!("{} -> {}", spec.extraction_type, parsed);
            result.insert(&spec.extraction_type, parsed);
        }

        Ok(result)
    }

    /// 提取并入库；返回值决定文件去向
    pub fn process_file(&self, item: &WorkItem) -> Result<ExtractionResult, PipelineError> {
        let result = self.extract(item)?;
        match &self.store {
            Some(store) => {
                let id = store.save(&result)?;
                info!("✅ Successfully processed {} (record {})", item.file_name, id);
            }
            None => info!(
                "✅ Successfully processed {} (no store configured)",
                item.file_name
            ),
        }
        Ok(result)
    }

    fn handle(&self, item: &WorkItem) -> Outcome {
        match self.process_file(item) {
            Ok(_) => Outcome::Processed,
            Err(e) => {
                error!("❌ [{}] {}: {}", e.kind(), item.file_name, e);
                // 先落失败日志，再移动图片
                self.error_log
                    .record(&ErrorRecord::from_error(&item.file_name, &e));
                Outcome::Failed
            }
        }
    }

    /// 扫描一次 input 目录，逐个处理
    pub fn run_sweep(&self) -> Result<SweepReport, QueueError> {
        self.sweep(None)
    }

    fn sweep(&self, flag: Option<&RunFlag>) -> Result<SweepReport, QueueError> {
        let items = self.queue().poll()?;
        let mut report = SweepReport::default();

        for item in items {
            if flag.map(|f| !f.is_running()).unwrap_or(false) {
                break;
            }
            if !self.queue().claim(&item) {
                continue;
            }
            info!("🖼️ Processing new file: {}", item.file_name);

            let outcome = self.handle(&item);
            match self.queue().commit(&item, outcome) {
                Ok(_) => match outcome {
                    Outcome::Processed => report.processed += 1,
                    Outcome::Failed => report.failed += 1,
                },
                Err(e) => {
                    warn!("⚠️ {} stays in input: {}", item.file_name, e);
                    report.stranded += 1;
                }
            }
        }

        if report.total() > 0 {
            info!(
                "📊 Sweep done: {} processed, {} failed, {} stranded",
                report.processed, report.failed, report.stranded
            );
        }
        Ok(report)
    }
}

/// 监控线程句柄：反复扫描 input，单轮出错或 panic 都不会让循环退出
pub struct PipelineMonitor {
    pipeline: Arc<ExtractionPipeline>,
    worker: Mutex<Option<Worker>>,
    join_timeout: Duration,
}

impl PipelineMonitor {
    pub fn new(pipeline: Arc<ExtractionPipeline>) -> Self {
        Self {
            pipeline,
            worker: Mutex::new(None),
            join_timeout: Duration::from_secs(5),
        }
    }

    pub fn pipeline(&self) -> &Arc<ExtractionPipeline> {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.as_ref().map(Worker::is_running).unwrap_or(false))
            .unwrap_or(false)
    }

    /// 已在运行时直接返回
    pub fn start(&self) -> io::Result<()> {
        let mut slot = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().map(Worker::is_running).unwrap_or(false) {
            return Ok(());
        }

        let pipeline = Arc::clone(&self.pipeline);
        let timing = pipeline.timing();
        let worker = Worker::spawn("inference-monitor", move |flag| {
            info!("🚀 Inference monitor started");
            while flag.is_running() {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| pipeline.sweep(Some(&flag))));
                let backoff = match outcome {
                    Ok(Ok(_)) => timing.poll_interval,
                    Ok(Err(e)) => {
                        error!(
                            "❌ [{}] Error in monitoring loop: {}",
                            ErrorKind::MonitorLoopException,
                            e
                        );
                        timing.error_backoff
                    }
                    Err(_) => {
                        error!(
                            "❌ [{}] Monitoring sweep panicked",
                            ErrorKind::MonitorLoopException
                        );
                        timing.error_backoff
                    }
                };
                flag.sleep(backoff);
            }
            info!("🛑 Inference monitor stopped");
        })?;
        *slot = Some(worker);
        Ok(())
    }

    /// 返回线程是否在超时内退出
    pub fn stop(&self) -> bool {
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        match worker {
            Some(mut worker) => worker.stop(self.join_timeout),
            None => true,
        }
    }
}

impl Drop for PipelineMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
